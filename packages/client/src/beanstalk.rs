//! beanstalkd text protocol over TCP.

use std::collections::HashMap;
use std::time::Duration;

use queue_core::{JobId, JobState, JobStats, Priority, TubeName};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;

use crate::{ClientConfig, Queue, QueueError, ReservedJob};

/// A single connection to a beanstalkd server.
pub struct BeanstalkConnection {
    stream: BufStream<TcpStream>,
    address: String,
}

impl BeanstalkConnection {
    /// Open a connection. The connection initially watches `default`.
    pub async fn connect(config: &ClientConfig) -> Result<Self, QueueError> {
        tracing::info!("Connecting to beanstalkd at {}", config.address);

        let connect_error = |source| QueueError::Connect {
            address: config.address.clone(),
            source,
        };
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
            .await
            .map_err(|_| {
                connect_error(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })?
            .map_err(connect_error)?;

        Ok(Self {
            stream: BufStream::new(stream),
            address: config.address.clone(),
        })
    }

    /// Address this connection was opened to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Add a tube to the watch list. Returns the number of watched tubes.
    pub async fn watch(&mut self, tube: &TubeName) -> Result<u32, QueueError> {
        let reply = self.command(&format!("watch {}", tube)).await?;
        parse_watching(&reply)
    }

    /// Remove a tube from the watch list. Returns the number of watched tubes.
    pub async fn ignore(&mut self, tube: &TubeName) -> Result<u32, QueueError> {
        let reply = self.command(&format!("ignore {}", tube)).await?;
        if reply == "NOT_IGNORED" {
            return Err(QueueError::Server(reply));
        }
        parse_watching(&reply)
    }

    /// Watch `tube` and nothing else.
    pub async fn watch_only(&mut self, tube: &TubeName) -> Result<(), QueueError> {
        self.watch(tube).await?;
        if !tube.is_default() {
            self.ignore(&TubeName::default()).await?;
        }
        tracing::debug!("Watching {} on {}", tube, self.address);
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<String, QueueError> {
        tracing::trace!("beanstalkd <- {}", line);
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        self.stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<String, QueueError> {
        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(QueueError::Closed);
        }
        let reply = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::trace!("beanstalkd -> {}", reply);

        match reply.as_str() {
            "OUT_OF_MEMORY" | "INTERNAL_ERROR" | "BAD_FORMAT" | "UNKNOWN_COMMAND" => {
                Err(QueueError::Server(reply))
            }
            _ => Ok(reply),
        }
    }

    /// Read a `<bytes>\r\n`-terminated data block following a reply line.
    async fn read_body(&mut self, len: &str) -> Result<Vec<u8>, QueueError> {
        let len: usize = len
            .parse()
            .map_err(|_| QueueError::Protocol(format!("bad body length {:?}", len)))?;
        let framed = len
            .checked_add(2)
            .ok_or_else(|| QueueError::Protocol(format!("body length {} out of range", len)))?;
        let mut body = vec![0; framed];
        self.stream.read_exact(&mut body).await?;
        if !body.ends_with(b"\r\n") {
            return Err(QueueError::Protocol("body not terminated by CRLF".into()));
        }
        body.truncate(len);
        Ok(body)
    }

    async fn read_ok_body(&mut self, reply: &str) -> Result<Vec<u8>, QueueError> {
        match reply.split_once(' ') {
            Some(("OK", len)) => self.read_body(len).await,
            _ if reply == "NOT_FOUND" => Err(QueueError::NotFound),
            _ => Err(unexpected(reply)),
        }
    }
}

impl Queue for BeanstalkConnection {
    async fn reserve(&mut self, timeout: Duration) -> Result<ReservedJob, QueueError> {
        let reply = self
            .command(&format!("reserve-with-timeout {}", timeout.as_secs()))
            .await?;
        let parts: Vec<&str> = reply.split(' ').collect();
        match parts.as_slice() {
            ["RESERVED", id, len] => {
                let id = JobId::parse(id).map_err(|_| unexpected(&reply))?;
                let body = self.read_body(len).await?;
                Ok(ReservedJob { id, body })
            }
            ["TIMED_OUT"] => Err(QueueError::TimedOut),
            ["DEADLINE_SOON"] => Err(QueueError::DeadlineSoon),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn delete(&mut self, id: JobId) -> Result<(), QueueError> {
        let reply = self.command(&format!("delete {}", id)).await?;
        match reply.as_str() {
            "DELETED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn release(
        &mut self,
        id: JobId,
        priority: Priority,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let reply = self
            .command(&format!("release {} {} {}", id, priority, delay.as_secs()))
            .await?;
        match reply.as_str() {
            "RELEASED" => Ok(()),
            "BURIED" => Err(QueueError::Buried),
            "NOT_FOUND" => Err(QueueError::NotFound),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn bury(&mut self, id: JobId, priority: Priority) -> Result<(), QueueError> {
        let reply = self.command(&format!("bury {} {}", id, priority)).await?;
        match reply.as_str() {
            "BURIED" => Ok(()),
            "NOT_FOUND" => Err(QueueError::NotFound),
            _ => Err(unexpected(&reply)),
        }
    }

    async fn stats_job(&mut self, id: JobId) -> Result<JobStats, QueueError> {
        let reply = self.command(&format!("stats-job {}", id)).await?;
        let body = self.read_ok_body(&reply).await?;
        parse_job_stats(&body)
    }

    async fn list_tubes(&mut self) -> Result<Vec<TubeName>, QueueError> {
        let reply = self.command("list-tubes").await?;
        let body = self.read_ok_body(&reply).await?;
        parse_tube_list(&body)
    }
}

fn unexpected(reply: &str) -> QueueError {
    QueueError::Protocol(format!("unexpected reply {:?}", reply))
}

fn parse_watching(reply: &str) -> Result<u32, QueueError> {
    match reply.split_once(' ') {
        Some(("WATCHING", count)) => count.parse().map_err(|_| unexpected(reply)),
        _ => Err(unexpected(reply)),
    }
}

/// Parse the YAML mapping returned by `stats-job`.
pub(crate) fn parse_job_stats(body: &[u8]) -> Result<JobStats, QueueError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| QueueError::Protocol("stats-job body is not UTF-8".into()))?;
    let fields: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .collect();

    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| QueueError::Protocol(format!("stats-job is missing {:?}", key)))
    };
    let number = |key: &str| {
        let value = field(key)?;
        value.parse::<u64>().map_err(|_| {
            QueueError::Protocol(format!("stats-job field {:?} is not a number: {:?}", key, value))
        })
    };

    let state = field("state")?;
    let priority = number("pri")?;

    Ok(JobStats {
        id: JobId(number("id")?),
        tube: field("tube")?.to_string(),
        state: JobState::parse(state)
            .ok_or_else(|| QueueError::Protocol(format!("unknown job state {:?}", state)))?,
        priority: Priority::try_from(priority)
            .map_err(|_| QueueError::Protocol(format!("priority {} out of range", priority)))?,
        age: number("age")?,
        ttr: Duration::from_secs(number("ttr")?),
        time_left: Duration::from_secs(number("time-left")?),
        reserves: number("reserves")?,
        timeouts: number("timeouts")?,
        releases: number("releases")?,
        buries: number("buries")?,
        kicks: number("kicks")?,
    })
}

/// Parse the YAML sequence returned by `list-tubes`.
pub(crate) fn parse_tube_list(body: &[u8]) -> Result<Vec<TubeName>, QueueError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| QueueError::Protocol("list-tubes body is not UTF-8".into()))?;
    text.lines()
        .filter_map(|line| line.strip_prefix("- "))
        .map(|name| {
            TubeName::parse(name.trim().trim_matches('"'))
                .map_err(|e| QueueError::Protocol(format!("bad tube name {:?}: {}", name, e)))
        })
        .collect()
}
