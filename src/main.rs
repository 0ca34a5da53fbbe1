// ABOUTME: Binary entry point: serve by default, or run a client subcommand

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use tmuxdeck::cli::{self, ClientCommand, EXIT_USAGE};
use tmuxdeck::config::ServerConfig;
use tmuxdeck::server::{self, AppState};

#[derive(Parser)]
#[command(name = "tmuxdeck", version, about = "Tmux session deck server and client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the server (default when no subcommand is given)
    Serve,
    #[command(flatten)]
    Client(ClientCommand),
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help/version go to stdout with success; real usage errors exit 64.
            if e.use_stderr() {
                let _ = e.print();
                std::process::exit(EXIT_USAGE);
            }
            let _ = e.print();
            return;
        }
    };

    match cli.command {
        None | Some(Command::Serve) => {
            setup_logging();
            if let Err(e) = run_server().await {
                error!("server failed: {e:#}");
                eprintln!("error: {e:#}");
                std::process::exit(1);
            }
        }
        Some(Command::Client(command)) => {
            let code = cli::run(command).await;
            std::process::exit(code);
        }
    }
}

async fn run_server() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let state = AppState::build(config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    server::serve(state, cancel).await
}

fn setup_logging() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tmuxdeck=info".into()),
        )
        .init();
}
