use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use typist::chat::run_terminal_chat;
use typist::constants::{CHAT_CADENCE_MS, DEFAULT_PORT, MOCK_LATENCY_MS};
use typist::response::MockResponseSource;
use typist::reveal::RevealUnit;
use typist::web_server::{start_web_server, WebConfig};

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Serve the chat page and its WebSocket.
    Start {
        #[arg(long, env = "TYPIST_PORT", default_value_t = DEFAULT_PORT, help = "Port for the web server.")]
        port: u16,
        #[command(flatten)]
        reveal: RevealArgs,
    },
    /// Chat in the terminal; answers are typed out as they reveal.
    Chat {
        #[command(flatten)]
        reveal: RevealArgs,
    },
}

#[derive(clap::Args, Debug)]
struct RevealArgs {
    #[arg(long, env = "TYPIST_CADENCE_MS", default_value_t = CHAT_CADENCE_MS, help = "Milliseconds between revealed characters.")]
    cadence_ms: u64,
    #[arg(long, env = "TYPIST_MOCK_LATENCY_MS", default_value_t = MOCK_LATENCY_MS, help = "Simulated response latency in milliseconds.")]
    latency_ms: u64,
    #[arg(long, help = "Reveal one grapheme cluster per tick instead of one character.")]
    graphemes: bool,
}

impl RevealArgs {
    fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    fn source(&self) -> MockResponseSource {
        MockResponseSource::new(Duration::from_millis(self.latency_ms))
    }

    fn unit(&self) -> RevealUnit {
        if self.graphemes {
            RevealUnit::Grapheme
        } else {
            RevealUnit::Char
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (TYPIST_* overrides)
    dotenvy::dotenv().ok();

    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,typist=debug). Logs go to
    // stderr so they never interleave with the terminal chat on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("typist starting with command: {:?}", cli.command);

    match cli.command {
        Commands::Start { port, reveal } => {
            let config = WebConfig::new(port, reveal.cadence(), reveal.unit());
            let source = reveal.source();

            let mut web_server_handle = tokio::spawn(async move {
                if let Err(e) = start_web_server(config, source).await {
                    error!("Web server failed: {:?}", e);
                }
            });

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);

            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Ctrl-C received, initiating shutdown...");
                }
                res = &mut web_server_handle => {
                    match res {
                        Ok(_) => info!("Web server task completed unexpectedly."),
                        Err(e) if e.is_panic() => error!("Web server task panicked: {:?}", e),
                        Err(e) => error!("Web server task failed: {:?}", e),
                    }
                }
            }

            if !web_server_handle.is_finished() {
                info!("Aborting web server task...");
                web_server_handle.abort();
            }
            info!("Shutdown complete.");
        }
        Commands::Chat { reveal } => {
            let source = reveal.source();
            run_terminal_chat(
                &source,
                reveal.cadence(),
                reveal.unit(),
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await
            .context("Chat session failed")?;
        }
    }

    Ok(())
}
