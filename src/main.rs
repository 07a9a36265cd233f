// src/main.rs
//! MQTT bag launcher
//!
//! Records broker traffic into a trace file, plays a trace back with its
//! original timing, or prints a trace summary.

use anyhow::{bail, Context, Result};
use clap::Parser;
use mqtt_bag::broker::BrokerClient;
use mqtt_bag::cli::{Cli, Mode};
use mqtt_bag::observability::{init_metrics, init_tracing};
use mqtt_bag::recording::Recorder;
use mqtt_bag::replay::{Player, PlayerSettings, TraceInfo};
use mqtt_bag::trace::{TraceReader, TraceWriter};
use mqtt_bag::utils::config::BagConfig;
use mqtt_bag::{BagError, TopicFilter};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration, then let flags win
    let mut config = BagConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_cli(cli.overrides());

    // Initialize observability (tracing, metrics)
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let Some(mode) = cli.mode() else {
        bail!("one of --rec, --play or --info is required");
    };

    if cli.loop_playback && !matches!(mode, Mode::Play(_)) {
        warn!("--loop only applies to playback, ignoring it");
    }

    let filter = TopicFilter::new(cli.topics.iter().cloned(), cli.no_topics.iter().cloned())
        .context("Invalid topic filter")?;

    let result = match &mode {
        Mode::Info(path) => show_info(path),
        Mode::Record(path) => {
            let cancel = shutdown_token();
            record(path, &config, filter, cancel).await
        }
        Mode::Play(path) => {
            let cancel = shutdown_token();
            let settings = PlayerSettings::from_config(&config.player, cli.loop_playback, cli.quiet);
            play(path, &config, filter, settings, cancel).await
        }
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn show_info(path: &Path) -> Result<()> {
    let reader = TraceReader::open(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;
    println!("{}", TraceInfo::from_reader(&reader));
    Ok(())
}

async fn record(path: &Path, config: &BagConfig, filter: TopicFilter, cancel: CancellationToken) -> Result<()> {
    let subscriptions = filter.subscriptions();
    if subscriptions.is_empty() {
        return Err(BagError::Config(
            "nothing to subscribe to: every allowed topic is also excluded".to_string(),
        )
        .into());
    }

    let mut client = BrokerClient::connect(&config.broker)
        .await
        .context("Failed to connect to broker")?;

    // The trace file only exists once the broker is reachable
    let recorded = async {
        let events = client
            .subscribe(&subscriptions, config.recorder.queue_capacity)
            .await?;
        let writer = TraceWriter::create(path)?;
        Recorder::new(filter, writer).run(events, cancel).await
    }
    .await;

    client.disconnect().await;

    let stats = recorded.with_context(|| format!("Recording to {} failed", path.display()))?;
    info!(
        "Recorded {} of {} messages ({} dropped, {:.3}s) to {}",
        stats.recorded,
        stats.received,
        stats.dropped,
        stats.duration,
        path.display()
    );
    Ok(())
}

async fn play(
    path: &Path,
    config: &BagConfig,
    filter: TopicFilter,
    settings: PlayerSettings,
    cancel: CancellationToken,
) -> Result<()> {
    let mut reader = TraceReader::open(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;

    let client = BrokerClient::connect(&config.broker)
        .await
        .context("Failed to connect to broker")?;

    let played = {
        let mut player = Player::new(&client, filter, settings);
        player.run(&mut reader, &cancel).await
    };

    client.disconnect().await;

    played.with_context(|| format!("Playback of {} failed", path.display()))?;
    Ok(())
}

/// Token cancelled on SIGINT or SIGTERM
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal, stopping...");
        token.cancel();
    });

    cancel
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for CTRL+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
