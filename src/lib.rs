//! Detection metadata ingestion.
//!
//! A long-running subscriber for inference metadata published on a ZeroMQ
//! bus. Each bus message is a two-part frame: a topic label, then a JSON
//! payload mapping a source key to an array of detections.
//!
//! # Architecture
//!
//! - `detect`: tolerant payload decoder (bytes -> `DetectionBatch`); malformed
//!   input is dropped, never fatal
//! - `metrics`: frame counters and running FPS behind `FrameMetrics`, with a
//!   no-op variant chosen at startup when counting is disabled
//! - `ingest`: the single-consumer loop (receive -> decode -> account ->
//!   report), cancellation via `ShutdownSignal`, optional reconnect policy
//! - `transport`: the `Subscriber` capability set and its ZeroMQ SUB adapter
//! - `analytics`: optional track/class summaries over decoded batches
//! - `config`: TOML settings with environment overrides

pub mod analytics;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod metrics;
pub mod transport;

pub use analytics::{AnalyticsSummary, FinalSummary, TrackAnalytics, TrackCacheStats};
pub use config::{BusSettings, CapacityHints, IngestConfig, MetricsSettings, SummarySettings};
pub use detect::{decode_payload, DecodeOutcome, Decoded, Detection, DetectionBatch, ParseFailure};
pub use frame::Frame;
pub use ingest::{IngestLoop, ReconnectPolicy, ShutdownSignal, StopReason};
pub use metrics::{CountingMetrics, FrameMetrics, MetricsSnapshot, NullMetrics};
pub use transport::{Part, RecvError, Subscriber, ZmqSubscriber};
