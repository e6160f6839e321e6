use std::path::PathBuf;

use broker::{DEFAULT_SHELL, RestartPolicy};
use clap::{Parser, ValueEnum};
use queue_client::DEFAULT_ADDRESS;
use queue_core::TubeName;

#[derive(Debug, Parser)]
#[command(name = "beanbroker")]
#[command(about = "Run a shell command for every job reserved from beanstalkd tubes.")]
pub(crate) struct Cli {
    /// beanstalkd address as host:port
    #[arg(long, env = "BEANBROKER_ADDRESS", default_value = DEFAULT_ADDRESS)]
    pub(crate) address: String,

    /// Command run for each job; the job body is written to its stdin.
    #[arg(long, env = "BEANBROKER_CMD")]
    pub(crate) cmd: String,

    /// Tube to serve (repeatable). Defaults to `default`.
    #[arg(long = "tube", env = "BEANBROKER_TUBES", value_delimiter = ',')]
    pub(crate) tubes: Vec<TubeName>,

    /// Serve every tube on the server, including ones created later.
    #[arg(long, env = "BEANBROKER_ALL", conflicts_with = "tubes")]
    pub(crate) all: bool,

    /// Brokers per tube.
    #[arg(long, env = "BEANBROKER_PER_TUBE", default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) per_tube: u16,

    /// Shell used as `shell -c cmd`.
    #[arg(long, env = "BEANBROKER_SHELL", default_value = DEFAULT_SHELL)]
    pub(crate) shell: PathBuf,

    /// Broker failures tolerated per tube before exiting.
    #[arg(long, env = "BEANBROKER_MAX_RESTARTS", default_value_t = RestartPolicy::default().max_restarts)]
    pub(crate) max_restarts: u32,

    /// Seconds to wait before replacing a failed broker.
    #[arg(long, env = "BEANBROKER_RESTART_DELAY", default_value_t = 1)]
    pub(crate) restart_delay: u64,

    /// Print each job result to stdout as a JSON line.
    #[arg(long, env = "BEANBROKER_EMIT_RESULTS")]
    pub(crate) emit_results: bool,

    /// Log output format (stderr).
    #[arg(long, env = "BEANBROKER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub(crate) log_format: LogFormat,
}

impl Cli {
    /// Configured tubes, or `default` when none were given.
    pub(crate) fn tubes(&self) -> Vec<TubeName> {
        if self.tubes.is_empty() {
            vec![TubeName::default()]
        } else {
            self.tubes.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}
