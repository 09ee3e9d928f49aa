//! Subtitle track selection policy.

use crate::config::SubtitleConfig;
use luawire_client::{Client, ClientError};
use luawire_protocol::SubtitleTrack;

/// Picks subtitle tracks by language, then by a word in the description.
#[derive(Debug, Clone)]
pub struct SubtitlePolicy {
    language: String,
    prefer: String,
}

impl SubtitlePolicy {
    pub fn new(language: &str, prefer: &str) -> Self {
        Self {
            language: language.to_lowercase(),
            prefer: prefer.to_lowercase(),
        }
    }

    /// Returns the tracks to select, in order.
    ///
    /// A lone language match is selected. If narrowing those matches by
    /// the preferred word leaves exactly one, it is selected too, so the
    /// last entry is the one that ends up active.
    pub fn choose<'a>(&self, tracks: &'a [SubtitleTrack]) -> Vec<&'a SubtitleTrack> {
        let mut picks = Vec::new();

        let by_language: Vec<&SubtitleTrack> = tracks
            .iter()
            .filter(|t| t.language.to_lowercase().contains(&self.language))
            .collect();
        if let [only] = by_language[..] {
            picks.push(only);
        }

        let preferred: Vec<&SubtitleTrack> = by_language
            .into_iter()
            .filter(|t| t.description.to_lowercase().contains(&self.prefer))
            .collect();
        if let [only] = preferred[..] {
            picks.push(only);
        }

        picks
    }

    /// Lists the host's tracks and applies [`Self::choose`]. Returns how
    /// many selections were made.
    pub async fn apply(&self, client: &Client) -> Result<usize, ClientError> {
        let tracks = client.subtitle_tracks().await?;
        tracing::debug!("Host offers {} subtitle track(s)", tracks.len());

        let picks = self.choose(&tracks);
        if picks.is_empty() {
            tracing::info!(
                "No single {} subtitle track among {} offered",
                self.language,
                tracks.len()
            );
        }
        for track in &picks {
            client.select_subtitle(track).await?;
        }
        Ok(picks.len())
    }
}

impl From<&SubtitleConfig> for SubtitlePolicy {
    fn from(config: &SubtitleConfig) -> Self {
        Self::new(&config.language, &config.prefer)
    }
}
