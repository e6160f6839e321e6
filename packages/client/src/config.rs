//! Connection configuration for the beanstalkd client.

use std::time::Duration;

use queue_core::TubeName;

use crate::{BeanstalkConnection, Connect, QueueError};

/// Default beanstalkd address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:11300";

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub address: String,
    /// How long to wait for the TCP connection to establish.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given server address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Connect for ClientConfig {
    type Queue = BeanstalkConnection;

    async fn connect(&self, tube: &TubeName) -> Result<BeanstalkConnection, QueueError> {
        let mut conn = BeanstalkConnection::connect(self).await?;
        conn.watch_only(tube).await?;
        Ok(conn)
    }
}
