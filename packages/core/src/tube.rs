//! Tube names.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest tube name the queue accepts.
pub const MAX_TUBE_NAME_LEN: usize = 200;

/// A validated tube name.
///
/// Names are 1 to 200 bytes drawn from letters, digits and `-+/;.$_()`,
/// and may not begin with a hyphen.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TubeName(String);

/// Reasons a tube name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TubeNameError {
    #[error("tube name is empty")]
    Empty,
    #[error("tube name is {0} bytes, limit is {MAX_TUBE_NAME_LEN}")]
    TooLong(usize),
    #[error("tube name may not start with '-'")]
    LeadingHyphen,
    #[error("tube name contains invalid character {0:?}")]
    InvalidChar(char),
}

impl TubeName {
    /// Validate and wrap a tube name.
    pub fn parse(name: impl Into<String>) -> Result<Self, TubeNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TubeNameError::Empty);
        }
        if name.len() > MAX_TUBE_NAME_LEN {
            return Err(TubeNameError::TooLong(name.len()));
        }
        if name.starts_with('-') {
            return Err(TubeNameError::LeadingHyphen);
        }
        if let Some(c) = name.chars().find(|c| !is_name_char(*c)) {
            return Err(TubeNameError::InvalidChar(c));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the tube every connection watches on connect.
    pub fn is_default(&self) -> bool {
        self.0 == "default"
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c)
}

impl Default for TubeName {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl std::str::FromStr for TubeName {
    type Err = TubeNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TubeName {
    type Error = TubeNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TubeName> for String {
    fn from(tube: TubeName) -> Self {
        tube.0
    }
}

impl AsRef<str> for TubeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TubeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
