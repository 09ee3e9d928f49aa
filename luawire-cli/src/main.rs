//! luawire-cli - Command-line interface for a Lua command host
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use luawire_client::{AnySignal, Client, ConnectionConfig};
use luawire_protocol::{DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "luawire-cli")]
#[command(about = "Command-line interface for a media player's Lua command host")]
#[command(version)]
struct Cli {
    /// Host address
    #[arg(long, default_value = "localhost", env = "LUAWIRE_HOST")]
    host: String,

    /// Host port
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "LUAWIRE_PORT")]
    port: u16,

    /// Largest reply accepted, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE, env = "LUAWIRE_MAX_FRAME_SIZE")]
    max_frame_size: usize,

    /// Connect timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Command to wait on if the host refuses the first connect (e.g. "waitfor VlcStarted")
    #[arg(short, long, env = "LUAWIRE_READY_COMMAND")]
    wait_command: Option<String>,

    /// Seconds to wait before retrying a refused connect, when no wait command is given
    #[arg(long)]
    wait_secs: Option<u64>,

    /// Skip the `return 2+2` check after connecting
    #[arg(long)]
    no_self_test: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// Check that the host evaluates Lua
    Ping,

    /// Run Lua code and print the result
    Exec {
        /// Lua source (or @file.lua to read from file)
        code: String,
    },

    /// List subtitle tracks of the current input
    Subtitles,

    /// Select a subtitle track by index
    SelectSubtitle {
        /// Track index as listed by `subtitles`
        #[arg(allow_hyphen_values = true)]
        index: i64,
    },

    /// Print unsolicited host messages until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = ConnectionConfig::new(cli.host.clone(), cli.port)
        .with_max_frame_size(cli.max_frame_size)
        .with_connect_timeout(Duration::from_secs(cli.timeout))
        .with_self_test(!cli.no_self_test);
    let ready = AnySignal::from_settings(
        cli.wait_command.as_deref(),
        cli.wait_secs.map(Duration::from_secs),
    );
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, ready).await?;
        }
        Some(Commands::Watch) => {
            // Subscribe before connecting so the host's greeting is not missed
            let mut events = client.subscribe_events();

            client.connect(&ready).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            eprintln!("{} {}", "Watching".green(), client.config().addr().cyan());
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(e) => println!("{}", e),
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} events", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = client.closed() => {
                        eprintln!("{}", "Connection closed".red());
                        break;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }

            client.close().await;
        }
        Some(cmd) => {
            client.connect(&ready).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            let result = commands::execute(&client, cmd).await;
            client.close().await;

            match result {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
