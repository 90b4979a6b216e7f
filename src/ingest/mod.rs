//! Ingestion loop.
//!
//! One thread, frames in arrival order:
//! receive topic -> receive payload -> decode -> account -> maybe report.
//!
//! Framing rules:
//! - the topic part must announce a following part, otherwise the frame is
//!   partial and the loop stops (no resynchronisation mid-stream)
//! - a failed payload receive after a topic is a partial frame, not a
//!   malformed payload: nothing is decoded or counted for it
//! - parts beyond the payload are drained and ignored so the next receive
//!   starts on a topic again
//!
//! The loop never returns an error: it returns why it stopped.

mod reconnect;
mod shutdown;

use std::fmt;

pub use reconnect::ReconnectPolicy;
pub use shutdown::ShutdownSignal;

use crate::analytics::TrackAnalytics;
use crate::config::CapacityHints;
use crate::detect::{decode_payload, Decoded};
use crate::frame::Frame;
use crate::metrics::{self, FrameMetrics, MetricsSnapshot};
use crate::transport::{Part, RecvError, Subscriber};

/// Why the ingestion loop returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The shutdown signal was triggered.
    Cancelled,
    /// The transport reported the stream closed.
    Closed,
    /// Receiving the topic part failed.
    Fault(String),
    /// A topic part arrived but the payload part did not.
    PartialFrame(String),
}

impl StopReason {
    /// Transport-side stop that a reconnect could recover from.
    pub fn is_transport_fault(&self) -> bool {
        !matches!(self, StopReason::Cancelled)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::Closed => write!(f, "stream closed"),
            StopReason::Fault(msg) => write!(f, "transport fault: {}", msg),
            StopReason::PartialFrame(msg) => write!(f, "partial frame: {}", msg),
        }
    }
}

enum Step {
    Frame(Frame),
    Idle,
    Stop(StopReason),
}

/// Single-consumer ingestion loop. Owns its subscriber exclusively.
pub struct IngestLoop<S: Subscriber> {
    subscriber: S,
    metrics: Box<dyn FrameMetrics>,
    shutdown: ShutdownSignal,
    capacity: Option<CapacityHints>,
    analytics: Option<TrackAnalytics>,
    frames_since_connect: u64,
    reports_emitted: u64,
}

impl<S: Subscriber> IngestLoop<S> {
    pub fn new(subscriber: S, metrics: Box<dyn FrameMetrics>, shutdown: ShutdownSignal) -> Self {
        Self {
            subscriber,
            metrics,
            shutdown,
            capacity: None,
            analytics: None,
            frames_since_connect: 0,
            reports_emitted: 0,
        }
    }

    pub fn with_capacity_hints(mut self, hints: CapacityHints) -> Self {
        self.capacity = Some(hints);
        self
    }

    pub fn with_analytics(mut self, analytics: TrackAnalytics) -> Self {
        self.analytics = Some(analytics);
        self
    }

    pub fn metrics(&self) -> &dyn FrameMetrics {
        self.metrics.as_ref()
    }

    pub fn analytics(&self) -> Option<&TrackAnalytics> {
        self.analytics.as_ref()
    }

    /// Number of periodic reports emitted so far.
    pub fn reports_emitted(&self) -> u64 {
        self.reports_emitted
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }

    /// Run until cancelled or the transport stops delivering whole frames.
    pub fn run(&mut self) -> StopReason {
        log::info!("ingesting from {}", self.subscriber.endpoint());
        loop {
            if self.shutdown.is_triggered() {
                return StopReason::Cancelled;
            }
            match self.next_frame() {
                Step::Frame(frame) => {
                    self.process_frame(&frame);
                }
                Step::Idle => {}
                Step::Stop(reason) => return reason,
            }
        }
    }

    /// `run`, reconnecting after transport stops as `policy` allows.
    ///
    /// Metrics and analytics carry over across reconnects. Receiving a frame
    /// on a connection resets the attempt count.
    pub fn run_with_reconnect<F>(&mut self, policy: &ReconnectPolicy, mut connect: F) -> StopReason
    where
        F: FnMut() -> anyhow::Result<S>,
    {
        let mut attempt = 0u32;
        loop {
            let reason = self.run();
            if !reason.is_transport_fault() {
                return reason;
            }
            if self.frames_since_connect > 0 {
                attempt = 0;
            }
            loop {
                attempt += 1;
                if attempt > policy.max_attempts {
                    return reason;
                }
                let delay = policy.backoff(attempt);
                log::warn!(
                    "{}; reconnecting in {:?} (attempt {}/{})",
                    reason,
                    delay,
                    attempt,
                    policy.max_attempts
                );
                if self.shutdown.sleep(delay) {
                    return StopReason::Cancelled;
                }
                match connect() {
                    Ok(subscriber) => {
                        self.subscriber = subscriber;
                        self.frames_since_connect = 0;
                        break;
                    }
                    Err(e) => log::error!("reconnect failed: {:#}", e),
                }
            }
        }
    }

    /// Decode and account one complete frame.
    ///
    /// The frame is counted whether or not its payload decodes.
    pub fn process_frame(&mut self, frame: &Frame) -> Decoded {
        self.frames_since_connect += 1;

        // Hot path: everything up to end_frame is timed.
        self.metrics.begin_frame();
        let decoded = decode_payload(&frame.payload);
        if let Some(hints) = &self.capacity {
            if hints.exceeded_by(&decoded.batch) {
                log::debug!(
                    "frame on {:?} exceeds capacity hints: {} sources, largest {} detections",
                    frame.topic_lossy(),
                    decoded.batch.source_count(),
                    decoded.batch.max_source_len()
                );
                self.metrics.on_capacity_exceeded();
            }
        }
        self.metrics.on_decoded(&decoded);
        self.metrics.on_frame();
        self.metrics.end_frame();

        if let Some(analytics) = &mut self.analytics {
            analytics.observe(&decoded.batch);
            if let Some(summary) = analytics.poll_summary() {
                summary.log();
            }
        }

        if let Some(snapshot) = self.metrics.poll_report() {
            metrics::log_report(&snapshot);
            self.reports_emitted += 1;
        }

        decoded
    }

    /// Log final metrics and analytics; returns the final metrics snapshot.
    pub fn finish(&self) -> Option<MetricsSnapshot> {
        if let Some(summary) = self.analytics.as_ref().and_then(TrackAnalytics::final_summary) {
            summary.log();
        }
        let snapshot = self.metrics.snapshot();
        if let Some(snapshot) = &snapshot {
            metrics::log_final(snapshot);
        }
        snapshot
    }

    fn next_frame(&mut self) -> Step {
        let topic = match self.subscriber.receive_part() {
            Ok(part) => part,
            Err(RecvError::Timeout) | Err(RecvError::Interrupted) => return Step::Idle,
            Err(RecvError::Closed) => return Step::Stop(StopReason::Closed),
            Err(RecvError::Fault(msg)) => return Step::Stop(StopReason::Fault(msg)),
        };
        if !topic.more {
            return Step::Stop(StopReason::PartialFrame(
                "topic part arrived without a payload part".to_string(),
            ));
        }

        let payload = match self.receive_continuation() {
            Ok(part) => part,
            Err(e) => {
                return Step::Stop(StopReason::PartialFrame(format!(
                    "payload receive failed after topic: {}",
                    e
                )))
            }
        };
        if payload.more {
            if let Err(e) = self.drain_extra_parts() {
                return Step::Stop(StopReason::PartialFrame(format!(
                    "trailing part receive failed: {}",
                    e
                )));
            }
        }

        Step::Frame(Frame {
            topic: topic.data,
            payload: payload.data,
        })
    }

    /// Receive a part that belongs to a message already started.
    /// Signal interruptions are retried; anything else is a failure.
    fn receive_continuation(&mut self) -> Result<Part, RecvError> {
        loop {
            match self.subscriber.receive_part() {
                Err(RecvError::Interrupted) => continue,
                other => return other,
            }
        }
    }

    fn drain_extra_parts(&mut self) -> Result<(), RecvError> {
        let mut dropped = 0usize;
        loop {
            let part = self.receive_continuation()?;
            dropped += 1;
            if !part.more {
                log::debug!("ignored {} trailing message part(s)", dropped);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{CountingMetrics, NullMetrics};
    use std::collections::VecDeque;
    use std::time::Duration;

    struct Script(VecDeque<Result<Part, RecvError>>);

    impl Subscriber for Script {
        fn endpoint(&self) -> &str {
            "script://unit"
        }

        fn receive_part(&mut self) -> Result<Part, RecvError> {
            self.0.pop_front().unwrap_or(Err(RecvError::Closed))
        }
    }

    fn counting() -> Box<dyn FrameMetrics> {
        Box::new(CountingMetrics::new(Duration::from_secs(3600)))
    }

    fn frames_received(ingest: &IngestLoop<Script>) -> u64 {
        ingest.metrics().snapshot().map(|s| s.frames_received).unwrap_or(0)
    }

    #[test]
    fn timeouts_are_idle_not_fatal() {
        let script = Script(VecDeque::from(vec![
            Err(RecvError::Timeout),
            Err(RecvError::Interrupted),
            Ok(Part::new("t", true)),
            Ok(Part::new("{}", false)),
        ]));
        let mut ingest = IngestLoop::new(script, counting(), ShutdownSignal::new());
        assert_eq!(ingest.run(), StopReason::Closed);
        assert_eq!(frames_received(&ingest), 1);
    }

    #[test]
    fn interrupted_payload_is_retried() {
        let script = Script(VecDeque::from(vec![
            Ok(Part::new("t", true)),
            Err(RecvError::Interrupted),
            Ok(Part::new("{}", false)),
        ]));
        let mut ingest = IngestLoop::new(script, counting(), ShutdownSignal::new());
        assert_eq!(ingest.run(), StopReason::Closed);
        assert_eq!(frames_received(&ingest), 1);
    }

    #[test]
    fn trailing_parts_are_drained() {
        let script = Script(VecDeque::from(vec![
            Ok(Part::new("t", true)),
            Ok(Part::new(r#"{"0": [{"track_id": 1, "class_id": 1}]}"#, true)),
            Ok(Part::new("extra", true)),
            Ok(Part::new("extra", false)),
            Ok(Part::new("t", true)),
            Ok(Part::new("{}", false)),
        ]));
        let mut ingest = IngestLoop::new(script, counting(), ShutdownSignal::new());
        assert_eq!(ingest.run(), StopReason::Closed);
        let snap = ingest.metrics().snapshot().unwrap();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.detections, 1);
    }

    #[test]
    fn single_part_message_is_partial_frame() {
        let script = Script(VecDeque::from(vec![Ok(Part::new("lonely", false))]));
        let mut ingest = IngestLoop::new(script, counting(), ShutdownSignal::new());
        assert!(matches!(ingest.run(), StopReason::PartialFrame(_)));
        assert_eq!(frames_received(&ingest), 0);
    }

    #[test]
    fn capacity_hints_are_counted_not_enforced() {
        let script = Script(VecDeque::from(vec![
            Ok(Part::new("t", true)),
            Ok(Part::new(
                r#"{"0": [{"track_id": 1, "class_id": 1}], "1": []}"#,
                false,
            )),
        ]));
        let mut ingest = IngestLoop::new(script, counting(), ShutdownSignal::new())
            .with_capacity_hints(CapacityHints {
                max_sources: 1,
                max_detections: 16,
            });
        ingest.run();
        let snap = ingest.metrics().snapshot().unwrap();
        assert_eq!(snap.capacity_exceeded, 1);
        assert_eq!(snap.detections, 1);
    }

    #[test]
    fn null_metrics_loop_never_reports() {
        let mut parts: Vec<Result<Part, RecvError>> = Vec::new();
        for _ in 0..10 {
            parts.push(Ok(Part::new("t", true)));
            parts.push(Ok(Part::new("{}", false)));
        }
        let script = Script(VecDeque::from(parts));
        let mut ingest = IngestLoop::new(script, Box::new(NullMetrics), ShutdownSignal::new());
        assert_eq!(ingest.run(), StopReason::Closed);
        assert_eq!(ingest.reports_emitted(), 0);
        assert!(ingest.finish().is_none());
    }

    #[test]
    fn stop_reason_classification() {
        assert!(!StopReason::Cancelled.is_transport_fault());
        assert!(StopReason::Closed.is_transport_fault());
        assert!(StopReason::PartialFrame("x".into()).is_transport_fault());
        assert_eq!(
            StopReason::Fault("boom".into()).to_string(),
            "transport fault: boom"
        );
    }
}
