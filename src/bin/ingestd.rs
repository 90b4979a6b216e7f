//! ingestd - subscribe to detection metadata on a ZeroMQ bus and report throughput.
//!
//! 1. Loads settings (TOML file, then INGEST_* environment overrides)
//! 2. Connects a SUB socket to the configured publisher endpoint
//! 3. Decodes each two-part frame and counts it
//! 4. Logs "[FPS] <value>" every report interval when metrics are enabled
//!
//! Ctrl-C stops the loop within one receive timeout; final totals are logged
//! on the way out.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use detection_ingest::{
    metrics, IngestConfig, IngestLoop, ShutdownSignal, StopReason, TrackAnalytics, ZmqSubscriber,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Ingest detection metadata from a ZeroMQ publisher"
)]
struct Args {
    /// TOML config file. Built-in defaults are used when omitted.
    #[arg(short, long, env = "INGEST_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still takes precedence).
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let cfg = IngestConfig::load(args.config.as_deref())?;

    log::info!("detection ingest starting");
    if let Some(path) = &args.config {
        log::info!("  Config: {}", path.display());
    }
    log::info!("  Endpoint: {}", cfg.bus.endpoint);
    log::info!("  Socket: {}", cfg.bus.socket_type);
    log::info!(
        "  Subscribe: {}",
        if cfg.bus.subscribe.is_empty() {
            "(all topics)"
        } else {
            cfg.bus.subscribe.as_str()
        }
    );
    log::info!("  RCVHWM: {}", cfg.bus.receive_hwm);
    log::info!(
        "  Capacity hints: {} sources, {} detections/source",
        cfg.capacity.max_sources,
        cfg.capacity.max_detections
    );
    log::info!(
        "  Metrics: {}",
        if cfg.metrics.enabled {
            format!("every {}s", cfg.metrics.report_interval.as_secs())
        } else {
            "disabled".to_string()
        }
    );
    if cfg.reconnect.is_enabled() {
        log::info!(
            "  Reconnect: up to {} attempts, backoff {:?}..{:?}",
            cfg.reconnect.max_attempts,
            cfg.reconnect.initial_backoff,
            cfg.reconnect.max_backoff
        );
    }

    let shutdown = ShutdownSignal::new();
    let handler_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_signal.trigger();
    })
    .context("set Ctrl-C handler")?;

    let subscriber = ZmqSubscriber::connect(&cfg.bus)?;
    let mut ingest = IngestLoop::new(subscriber, metrics::from_settings(&cfg.metrics), shutdown)
        .with_capacity_hints(cfg.capacity);
    if cfg.summary.enabled {
        ingest = ingest.with_analytics(
            TrackAnalytics::new(cfg.summary.interval).with_track_limit(cfg.summary.max_tracked_ids),
        );
    }

    log::info!("waiting for frames (Ctrl-C to stop)...");
    let bus = cfg.bus.clone();
    let reason = ingest.run_with_reconnect(&cfg.reconnect, || ZmqSubscriber::connect(&bus));
    ingest.finish();

    exit_result(&reason)
}

/// Clean stops exit 0. Transport stops become main's error, which is the
/// only place they are printed.
fn exit_result(reason: &StopReason) -> Result<()> {
    match reason {
        StopReason::Cancelled | StopReason::Closed => {
            log::info!("ingest stopped: {}", reason);
            Ok(())
        }
        StopReason::Fault(_) | StopReason::PartialFrame(_) => {
            Err(anyhow!("ingest stopped: {}", reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_stops_exit_zero() {
        assert!(exit_result(&StopReason::Cancelled).is_ok());
        assert!(exit_result(&StopReason::Closed).is_ok());
    }

    #[test]
    fn transport_stops_carry_the_reason_once() {
        let err = exit_result(&StopReason::Fault("socket gone".into())).unwrap_err();
        assert_eq!(err.to_string(), "ingest stopped: transport fault: socket gone");
        assert_eq!(err.chain().count(), 1);

        let err = exit_result(&StopReason::PartialFrame("no payload".into())).unwrap_err();
        assert_eq!(err.to_string(), "ingest stopped: partial frame: no payload");
    }
}
