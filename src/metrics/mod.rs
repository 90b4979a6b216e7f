//! Throughput metrics.
//!
//! Two implementations share the `FrameMetrics` capability set:
//! - `NullMetrics`: every call is a no-op, no report is ever produced
//! - `CountingMetrics`: counters, running FPS, hot-path latency window
//!
//! The variant is picked once at startup (`from_settings`). The ingestion
//! loop calls through the trait object and never branches on "enabled".

mod counting;
mod latency;

use std::time::Duration;

pub use counting::CountingMetrics;
pub use latency::{LatencyStats, LatencyWindow, LATENCY_WINDOW};

use crate::config::MetricsSettings;
use crate::detect::Decoded;

/// Point-in-time view of the counting metrics.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricsSnapshot {
    /// Frames with both parts received (decoded or not).
    pub frames_received: u64,
    /// Frames whose payload parsed as a JSON object.
    pub frames_decoded: u64,
    /// Frames whose payload was dropped by the decoder.
    pub frames_malformed: u64,
    pub detections: u64,
    pub skipped_detections: u64,
    /// Frames that exceeded a soft capacity hint.
    pub capacity_exceeded: u64,
    /// Running average since the pipeline started.
    pub frames_per_second: f64,
    /// Rate over the last `LATENCY_WINDOW` frame-to-frame intervals.
    pub current_fps: f64,
    pub uptime: Duration,
    pub latency: LatencyStats,
}

/// Capability set driven by the ingestion loop, once per frame, in order:
/// `begin_frame`, `on_decoded`, `on_frame`, `end_frame`, `poll_report`.
pub trait FrameMetrics: Send {
    /// Marks the start of the hot path for the current frame.
    fn begin_frame(&mut self);

    /// Counts one received frame. Constant time, no other side effect.
    fn on_frame(&mut self);

    /// Accounts the decoder's outcome for the current frame.
    fn on_decoded(&mut self, decoded: &Decoded);

    /// Counts a frame that exceeded a soft capacity hint.
    fn on_capacity_exceeded(&mut self);

    /// Marks the end of the hot path for the current frame.
    fn end_frame(&mut self);

    /// Returns a snapshot when the report interval has elapsed since the
    /// last report, and restarts the interval. Counters are not reset.
    fn poll_report(&mut self) -> Option<MetricsSnapshot>;

    /// Current snapshot, `None` when counting is disabled.
    fn snapshot(&self) -> Option<MetricsSnapshot>;

    fn is_enabled(&self) -> bool;
}

/// Metrics variant used when counting is disabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMetrics;

impl FrameMetrics for NullMetrics {
    #[inline]
    fn begin_frame(&mut self) {}

    #[inline]
    fn on_frame(&mut self) {}

    #[inline]
    fn on_decoded(&mut self, _decoded: &Decoded) {}

    #[inline]
    fn on_capacity_exceeded(&mut self) {}

    #[inline]
    fn end_frame(&mut self) {}

    #[inline]
    fn poll_report(&mut self) -> Option<MetricsSnapshot> {
        None
    }

    fn snapshot(&self) -> Option<MetricsSnapshot> {
        None
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Select the metrics variant for this process.
pub fn from_settings(settings: &MetricsSettings) -> Box<dyn FrameMetrics> {
    if settings.enabled {
        Box::new(CountingMetrics::new(settings.report_interval))
    } else {
        Box::new(NullMetrics)
    }
}

/// Emit a periodic report line. The `[FPS]` line is the operator-visible one.
pub fn log_report(snapshot: &MetricsSnapshot) {
    log::info!(target: "detection_ingest::report", "[FPS] {:.2}", snapshot.frames_per_second);
    log::info!(
        target: "detection_ingest::report",
        "fps current={:.2} average={:.2}",
        snapshot.current_fps,
        snapshot.frames_per_second
    );
    log::debug!(
        target: "detection_ingest::report",
        "frames received={} decoded={} malformed={} detections={} skipped={} over_capacity={} latency avg={:?} p99={:?}",
        snapshot.frames_received,
        snapshot.frames_decoded,
        snapshot.frames_malformed,
        snapshot.detections,
        snapshot.skipped_detections,
        snapshot.capacity_exceeded,
        snapshot.latency.avg,
        snapshot.latency.p99
    );
}

/// Emit the full metrics block logged at shutdown.
pub fn log_final(snapshot: &MetricsSnapshot) {
    let latency = &snapshot.latency;
    log::info!("final metrics");
    log::info!(
        "  fps: current={:.2} average={:.2} over {:.1}s",
        snapshot.current_fps,
        snapshot.frames_per_second,
        snapshot.uptime.as_secs_f64()
    );
    log::info!(
        "  frames: received={} decoded={} malformed={}",
        snapshot.frames_received,
        snapshot.frames_decoded,
        snapshot.frames_malformed
    );
    log::info!(
        "  detections: accepted={} skipped={} over_capacity_frames={}",
        snapshot.detections,
        snapshot.skipped_detections,
        snapshot.capacity_exceeded
    );
    log::info!(
        "  latency (ms): min={:.3} avg={:.3} p95={:.3} p99={:.3} max={:.3}",
        as_millis_f64(latency.min),
        as_millis_f64(latency.avg),
        as_millis_f64(latency.p95),
        as_millis_f64(latency.p99),
        as_millis_f64(latency.max)
    );
}

fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::decode_payload;

    #[test]
    fn null_metrics_never_reports() {
        let mut metrics = NullMetrics;
        let decoded = decode_payload(br#"{"0": [{"track_id": 1, "class_id": 1}]}"#);
        for _ in 0..1000 {
            metrics.begin_frame();
            metrics.on_decoded(&decoded);
            metrics.on_frame();
            metrics.end_frame();
            assert!(metrics.poll_report().is_none());
        }
        assert!(metrics.snapshot().is_none());
        assert!(!metrics.is_enabled());
    }

    #[test]
    fn from_settings_selects_variant() {
        let enabled = MetricsSettings {
            enabled: true,
            report_interval: Duration::from_secs(5),
        };
        let disabled = MetricsSettings {
            enabled: false,
            ..enabled.clone()
        };
        assert!(from_settings(&enabled).is_enabled());
        assert!(from_settings(&enabled).snapshot().is_some());
        assert!(!from_settings(&disabled).is_enabled());
    }
}
