// src/observability/mod.rs
//! Logging and metrics setup
//!
//! Logs go to stderr through `tracing-subscriber` so that stdout stays free
//! for the `--info` report. Counters use the `metrics` facade; they are only
//! exported when a Prometheus listen address is configured.

use crate::utils::config::{LoggingConfig, MetricsConfig};
use crate::utils::errors::{BagError, Result};
use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Frames written to a trace
pub const FRAMES_RECORDED: &str = "mqtt_bag_frames_recorded_total";

/// Inbound messages discarded by the recorder's topic filter
pub const FRAMES_FILTERED: &str = "mqtt_bag_frames_filtered_total";

/// Frames published during playback
pub const FRAMES_PUBLISHED: &str = "mqtt_bag_frames_published_total";

/// Frames skipped by the player's topic filter
pub const FRAMES_SKIPPED: &str = "mqtt_bag_frames_skipped_total";

/// Inbound messages lost because the event channel was full
pub const EVENTS_DROPPED: &str = "mqtt_bag_events_dropped_total";

/// Loop restarts during playback
pub const PLAYBACK_LOOPS: &str = "mqtt_bag_playback_loops_total";

/// Initialize the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| BagError::Config(format!("invalid log level {:?}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| BagError::Config(format!("failed to install tracing subscriber: {}", e)))
}

/// Describe counters and start the Prometheus exporter if configured
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    if let Some(addr) = config.listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| BagError::Config(format!("failed to start metrics exporter: {}", e)))?;
        info!("Serving metrics on http://{}/metrics", addr);
    }

    describe_counter!(FRAMES_RECORDED, Unit::Count, "Frames appended to the trace file");
    describe_counter!(FRAMES_FILTERED, Unit::Count, "Inbound messages rejected by the topic filter");
    describe_counter!(FRAMES_PUBLISHED, Unit::Count, "Frames published during playback");
    describe_counter!(FRAMES_SKIPPED, Unit::Count, "Frames skipped by the playback topic filter");
    describe_counter!(EVENTS_DROPPED, Unit::Count, "Inbound messages dropped on a full event channel");
    describe_counter!(PLAYBACK_LOOPS, Unit::Count, "Times playback restarted from the first frame");

    Ok(())
}
