use clap::{Parser, ValueEnum};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use admission::config::AdmissionConfig;
use admission::gate::AdmissionGate;
use admission::serve::serve_lines;

/// Answer admission requests read as JSON lines on stdin.
#[derive(Debug, Parser)]
#[command(name = "admission", version, about)]
struct Args {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries decisions.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);
    match args.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    info!("Starting admission gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = AdmissionConfig::load(args.config.as_deref())?;
    info!(
        action_classes = config.rate_limiting.actions.len(),
        sweep_interval_secs = config.rate_limiting.sweep_interval_secs,
        "Configuration loaded"
    );

    let gate = Arc::new(AdmissionGate::from_config(&config)?);

    let sweeper = {
        let gate = gate.clone();
        let period = Duration::from_secs(config.rate_limiting.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = gate.sweep();
                info!(
                    removed = removed,
                    tracked = gate.limiters().tracked_identities(),
                    "Swept idle rate limit records"
                );
            }
        })
    };

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    tokio::select! {
        result = serve_lines(&gate, stdin, stdout) => {
            let handled = result?;
            info!(handled = handled, "Input closed");
        }
        _ = shutdown_signal() => {}
    }

    sweeper.abort();
    info!("Admission gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
