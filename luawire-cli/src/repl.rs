//! Interactive REPL.

use crate::commands::{format_json, format_tracks, select_by_index};
use colored::Colorize;
use luawire_client::{AnySignal, Client};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use serde_json::Value;
use tokio::sync::broadcast;

const HELP_TEXT: &str = r#"
Available commands:
  help                  Show this help
  ping                  Run the `return 2+2` check
  subs                  List subtitle tracks
  select <index>        Select a subtitle track
  reconnect             Drop the connection and connect again

  quit, exit            Exit the REPL

Anything else is sent to the host as Lua, e.g.:
  return vlc.playlist.status()
"#;

/// A parsed REPL line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Line<'a> {
    Help,
    Quit,
    Ping,
    Subtitles,
    Select(&'a str),
    Reconnect,
    Lua(&'a str),
}

impl<'a> Line<'a> {
    fn parse(line: &'a str) -> Self {
        let mut parts = line.splitn(2, char::is_whitespace);
        let word = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default().trim();

        match (word.to_lowercase().as_str(), rest.is_empty()) {
            ("help" | "?", true) => Line::Help,
            ("quit" | "exit" | "q", true) => Line::Quit,
            ("ping", true) => Line::Ping,
            ("subs" | "subtitles", true) => Line::Subtitles,
            ("select", false) => Line::Select(rest),
            ("reconnect", true) => Line::Reconnect,
            _ => Line::Lua(line),
        }
    }
}

pub async fn run(client: Client, ready: AnySignal) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "luawire CLI".bold().cyan());
    println!("Connecting to {}...", client.config().addr());

    let mut events = client.subscribe_events();
    client.connect(&ready).await?;
    println!("{}", "Connected!".green());

    // Create readline editor
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    // Load history
    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".luawire_history"))
        .unwrap_or_else(|_| ".luawire_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type 'help' for available commands.\n");

    loop {
        print_events(&mut events);

        let prompt = format!("{} ", "lua>".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match execute_repl_command(&client, &ready, line).await {
                    Ok(Some(output)) => println!("{}\n", output),
                    Ok(None) => break, // Exit command
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    // Save history
    let _ = rl.save_history(&history_path);

    client.close().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}

/// Prints events that arrived since the last prompt.
fn print_events(events: &mut broadcast::Receiver<Value>) {
    loop {
        match events.try_recv() {
            Ok(event) => println!("{} {}", "event".magenta(), event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                println!("{}: lagged {} events", "Warning".yellow(), n);
            }
            Err(_) => break,
        }
    }
}

async fn execute_repl_command(
    client: &Client,
    ready: &AnySignal,
    line: &str,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let parsed = Line::parse(line);

    match parsed {
        Line::Help => return Ok(Some(HELP_TEXT.to_string())),
        Line::Quit => return Ok(None),
        Line::Reconnect => {
            client.close().await;
            client.connect(ready).await?;
            return Ok(Some("Reconnected".green().to_string()));
        }
        _ => {}
    }

    // A dead connection is replaced before the next command.
    if !client.is_connected() {
        println!("{}", "Connection lost, reconnecting...".yellow());
        client.close().await;
        client.connect(ready).await?;
    }

    match parsed {
        Line::Ping => {
            client.test_connection().await?;
            Ok(Some("PONG".green().to_string()))
        }
        Line::Subtitles => {
            let tracks = client.subtitle_tracks().await?;
            Ok(Some(format_tracks(&tracks)))
        }
        Line::Select(arg) => match arg.parse::<i64>() {
            Ok(index) => Ok(Some(select_by_index(client, index).await?)),
            Err(_) => Ok(Some("Usage: select <index>".to_string())),
        },
        Line::Lua(code) => {
            let reply = client.execute(code).await?;
            Ok(Some(format_json(reply.result())))
        }
        Line::Help | Line::Quit | Line::Reconnect => unreachable!(),
    }
}
