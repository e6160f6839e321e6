use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use broker::{BrokerConfig, RestartPolicy, SupervisorConfig, SupervisorMessage, start_supervisor};
use clap::Parser;
use queue_client::ClientConfig;
use queue_core::{JobResult, TubeName};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, LogFormat};

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = installed {
        eprintln!("failed to install tracing subscriber: {}", e);
    }
}

/// Print results as JSON lines until every broker has dropped its sender.
fn spawn_result_printer(mut results: mpsc::Receiver<JobResult>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(result) = results.recv().await {
            let line = match serde_json::to_string(&result) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(job_id = %result.job_id, "failed to encode result: {}", e);
                    continue;
                }
            };
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", line).and_then(|()| stdout.flush()) {
                tracing::warn!("failed to write result: {}", e);
            }
        }
    })
}

fn supervisor_config(cli: &Cli) -> SupervisorConfig {
    let template = BrokerConfig::new(TubeName::default(), cli.cmd.clone()).with_shell(&cli.shell);
    let config = SupervisorConfig::new(template)
        .with_per_tube(usize::from(cli.per_tube))
        .with_restart(RestartPolicy {
            max_restarts: cli.max_restarts,
            delay: Duration::from_secs(cli.restart_delay),
        });

    if cli.all {
        config.all_tubes()
    } else {
        config.with_tubes(cli.tubes())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = supervisor_config(&cli);
    let printer = if cli.emit_results {
        let (results_tx, results_rx) = mpsc::channel(1);
        config = config.with_results(results_tx);
        Some(spawn_result_printer(results_rx))
    } else {
        None
    };

    tracing::info!("connecting to beanstalkd at {}", cli.address);
    let handle = start_supervisor(ClientConfig::new(cli.address.clone()), config)
        .await
        .context("failed to start supervisor")?;
    let supervisor = handle.actor().clone();

    let wait = handle.wait();
    tokio::pin!(wait);
    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("failed to listen for Ctrl-C: {}", e);
            }
            tracing::info!("shutting down");
            if let Err(e) = supervisor.send_message(SupervisorMessage::Shutdown) {
                tracing::warn!("supervisor already stopped: {}", e);
            }
            wait.await
        }
    };

    if let Some(printer) = printer {
        printer.abort();
    }

    outcome.context("broker supervisor stopped")?;
    Ok(())
}
