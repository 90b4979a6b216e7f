use std::time::{Duration, Instant};

use super::{FrameMetrics, LatencyWindow, MetricsSnapshot};
use crate::detect::Decoded;

/// Counting metrics. Owned by the ingestion loop thread; no atomics needed.
#[derive(Clone, Debug)]
pub struct CountingMetrics {
    frames_received: u64,
    frames_decoded: u64,
    frames_malformed: u64,
    detections: u64,
    skipped_detections: u64,
    capacity_exceeded: u64,
    started: Instant,
    last_report: Instant,
    report_interval: Duration,
    frame_started: Option<Instant>,
    last_frame_end: Instant,
    latency: LatencyWindow,
    frame_intervals: LatencyWindow,
}

impl CountingMetrics {
    pub fn new(report_interval: Duration) -> Self {
        Self::started_at(Instant::now(), report_interval)
    }

    /// Counting metrics whose pipeline start time is `started`.
    pub fn started_at(started: Instant, report_interval: Duration) -> Self {
        Self {
            frames_received: 0,
            frames_decoded: 0,
            frames_malformed: 0,
            detections: 0,
            skipped_detections: 0,
            capacity_exceeded: 0,
            started,
            last_report: started,
            report_interval,
            frame_started: None,
            last_frame_end: started,
            latency: LatencyWindow::default(),
            frame_intervals: LatencyWindow::default(),
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Frames per second since start: `frames * 1000 / elapsed_ms`.
    ///
    /// Returns 0.0 when less than one millisecond has elapsed.
    pub fn rate_since_start(&self, now: Instant) -> f64 {
        let elapsed_ms = now.saturating_duration_since(self.started).as_millis();
        if elapsed_ms == 0 {
            return 0.0;
        }
        self.frames_received as f64 * 1000.0 / elapsed_ms as f64
    }

    /// Frames per second over the recent frame-to-frame intervals.
    ///
    /// Returns 0.0 before the first timed frame.
    pub fn current_fps(&self) -> f64 {
        match self.frame_intervals.mean() {
            Some(mean) if !mean.is_zero() => 1.0 / mean.as_secs_f64(),
            _ => 0.0,
        }
    }

    pub fn begin_frame_at(&mut self, now: Instant) {
        self.frame_started = Some(now);
    }

    /// Close the timed section opened by `begin_frame_at`. Records the
    /// hot-path latency and the interval since the previous frame ended.
    pub fn end_frame_at(&mut self, now: Instant) {
        let Some(started) = self.frame_started.take() else {
            return;
        };
        self.latency.record(now.saturating_duration_since(started));
        self.frame_intervals
            .record(now.saturating_duration_since(self.last_frame_end));
        self.last_frame_end = now;
    }

    pub fn snapshot_at(&self, now: Instant) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received,
            frames_decoded: self.frames_decoded,
            frames_malformed: self.frames_malformed,
            detections: self.detections,
            skipped_detections: self.skipped_detections,
            capacity_exceeded: self.capacity_exceeded,
            frames_per_second: self.rate_since_start(now),
            current_fps: self.current_fps(),
            uptime: now.saturating_duration_since(self.started),
            latency: self.latency.stats(),
        }
    }

    /// Report check against an explicit clock. Only `last_report` moves.
    pub fn poll_report_at(&mut self, now: Instant) -> Option<MetricsSnapshot> {
        if now.saturating_duration_since(self.last_report) < self.report_interval {
            return None;
        }
        self.last_report = now;
        Some(self.snapshot_at(now))
    }
}

impl FrameMetrics for CountingMetrics {
    fn begin_frame(&mut self) {
        self.begin_frame_at(Instant::now());
    }

    #[inline]
    fn on_frame(&mut self) {
        self.frames_received += 1;
    }

    fn on_decoded(&mut self, decoded: &Decoded) {
        if decoded.is_parsed() {
            self.frames_decoded += 1;
        } else {
            self.frames_malformed += 1;
        }
        self.detections += decoded.batch.detection_count() as u64;
        self.skipped_detections += decoded.skipped_detections() as u64;
    }

    fn on_capacity_exceeded(&mut self) {
        self.capacity_exceeded += 1;
    }

    fn end_frame(&mut self) {
        self.end_frame_at(Instant::now());
    }

    fn poll_report(&mut self) -> Option<MetricsSnapshot> {
        self.poll_report_at(Instant::now())
    }

    fn snapshot(&self) -> Option<MetricsSnapshot> {
        Some(self.snapshot_at(Instant::now()))
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
