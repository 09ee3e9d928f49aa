//! luawire - subtitle keeper
//!
//! Connects to a media player's Lua command interface on a fixed interval
//! and selects the preferred subtitle track.

mod config;
mod selector;

use config::Config;
use luawire_client::{AnySignal, Client, ClientError};
use selector::SubtitlePolicy;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if LUAWIRE_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("LUAWIRE_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            if std::env::var("LUAWIRE_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    let ready = config.readiness.signal();
    let policy = SubtitlePolicy::from(&config.subtitles);

    tracing::info!("Starting luawire");
    tracing::info!("  Host: {}:{}", config.host.host, config.host.port);
    tracing::info!("  Poll interval: {:?}", config.poll.interval());
    tracing::info!("  Ready signal: {}", ready);
    tracing::info!(
        "  Subtitles: language '{}', prefer '{}'",
        config.subtitles.language,
        config.subtitles.prefer
    );

    tokio::select! {
        _ = poll_forever(&config, &ready, &policy) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    tracing::info!("luawire stopped");
    Ok(())
}

async fn poll_forever(config: &Config, ready: &AnySignal, policy: &SubtitlePolicy) {
    loop {
        if let Err(e) = run_cycle(config, ready, policy).await {
            tracing::warn!(
                "Cycle failed ({:?}): {}; retrying in {:?}",
                e.kind(),
                e,
                config.poll.interval()
            );
            tokio::time::sleep(config.poll.interval()).await;
        }
    }
}

/// One connect, select, wait round. Returns early when the host goes away
/// so the next cycle can wait for it to come back.
async fn run_cycle(
    config: &Config,
    ready: &AnySignal,
    policy: &SubtitlePolicy,
) -> Result<(), ClientError> {
    let client = Client::new(config.connection());
    client.connect(ready).await?;

    let result = policy.apply(&client).await;
    if result.is_ok() {
        match tokio::time::timeout(config.poll.interval(), client.closed()).await {
            Ok(()) => tracing::info!("Host connection ended"),
            Err(_) => tracing::debug!("Poll interval elapsed"),
        }
    }

    client.close().await;
    result.map(|selected| tracing::debug!("Made {} selection(s)", selected))
}
