//! toolrelay binary entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolrelay::cli::Cli;
use toolrelay::config::{load_servers_or_empty, resolve_servers_path, RelaySettings};
use toolrelay::dispatch::ChatCompletionsDecider;
use toolrelay::error::RelayError;
use toolrelay::lifecycle::Lifecycle;

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.log_filter());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };
    let code = runtime.block_on(run(cli));
    // A console read may still be parked on a blocking thread; do not wait for it.
    runtime.shutdown_background();
    code
}

async fn run(cli: Cli) -> ExitCode {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let settings = cli.apply(RelaySettings::from_env());
    let cwd = std::env::current_dir().unwrap_or_default();
    let path = resolve_servers_path(cli.config.as_deref(), &cwd);
    let configs = load_servers_or_empty(&path);

    let lifecycle = match Lifecycle::start(configs, settings).await {
        Ok(lifecycle) => lifecycle,
        Err(RelayError::NoServers { attempted: 0 }) => {
            eprintln!("No enabled tool servers in {}", path.display());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let startup = lifecycle.startup_report();
    for registered in &startup.registered {
        eprintln!(
            "Connected to {} ({} tools)",
            registered.server,
            registered.operations.len()
        );
    }
    for failure in &startup.failures {
        eprintln!("Failed to connect to {}: {}", failure.server, failure.error);
    }
    println!("\nMCP client started. Type 'tools' to list tools, 'exit' to quit.");

    let decider = Arc::new(ChatCompletionsDecider::new(
        lifecycle.settings().decision.clone(),
    ));
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();

    match lifecycle.run(decider, stdin, stdout, cancel).await {
        Ok(report) => {
            for failure in &report.failures {
                eprintln!("Error closing {}: {}", failure.server, failure.errors.join("; "));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
