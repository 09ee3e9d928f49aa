//! Command execution.

use crate::Commands;
use colored::Colorize;
use luawire_client::Client;
use luawire_protocol::SubtitleTrack;
use serde_json::Value;

/// Executes a command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Repl | Commands::Watch => unreachable!(),

        Commands::Ping => {
            client.test_connection().await?;
            Ok("PONG".green().to_string())
        }

        Commands::Exec { code } => {
            let code = parse_code_arg(&code)?;
            let reply = client.execute(&code).await?;
            Ok(format_json(reply.result()))
        }

        Commands::Subtitles => {
            let tracks = client.subtitle_tracks().await?;
            Ok(format_tracks(&tracks))
        }

        Commands::SelectSubtitle { index } => select_by_index(client, index).await,
    }
}

/// Selects the track listed under `index`.
pub async fn select_by_index(
    client: &Client,
    index: i64,
) -> Result<String, Box<dyn std::error::Error>> {
    let tracks = client.subtitle_tracks().await?;
    let track = tracks
        .iter()
        .find(|t| t.index == index)
        .ok_or_else(|| format!("no subtitle track with index {}", index))?;

    client.select_subtitle(track).await?;
    Ok(format!(
        "{} {} ({})",
        "Selected".green(),
        track.description.cyan(),
        track.language
    ))
}

/// Formats a track listing, one track per line.
pub fn format_tracks(tracks: &[SubtitleTrack]) -> String {
    if tracks.is_empty() {
        return "No subtitle tracks".yellow().to_string();
    }
    tracks
        .iter()
        .map(|t| {
            format!(
                "[{}] {} ({})",
                t.index.to_string().cyan(),
                t.description,
                t.language.yellow()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a code argument (either inline Lua or @file.lua).
fn parse_code_arg(arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        Ok(std::fs::read_to_string(path)?)
    } else {
        Ok(arg.to_string())
    }
}

/// Formats JSON for display.
pub fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
