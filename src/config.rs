use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analytics::DEFAULT_MAX_TRACKED_IDS;
use crate::detect::DetectionBatch;
use crate::ingest::ReconnectPolicy;

const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:5555";
const DEFAULT_SOCKET_TYPE: &str = "sub";
const DEFAULT_RCVHWM: u32 = 1000;
const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 500;
const DEFAULT_MAX_SOURCES: usize = 1;
const DEFAULT_MAX_DETECTIONS: usize = 16;
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 5;
const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 10;
const DEFAULT_RECONNECT_INITIAL_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct IngestConfigFile {
    analytics: Option<AnalyticsConfigFile>,
    zmq: Option<ZmqConfigFile>,
    metrics: Option<MetricsConfigFile>,
    reconnect: Option<ReconnectConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnalyticsConfigFile {
    max_sources: Option<usize>,
    max_detections: Option<usize>,
    summary: Option<bool>,
    summary_interval_secs: Option<u64>,
    max_tracked_ids: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ZmqConfigFile {
    endpoint: Option<String>,
    socket_type: Option<String>,
    subscribe: Option<String>,
    rcvhwm: Option<u32>,
    receive_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MetricsConfigFile {
    enabled: Option<bool>,
    report_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ReconnectConfigFile {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

/// Static settings for one ingestion process. Read-only once loaded.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub bus: BusSettings,
    pub capacity: CapacityHints,
    pub metrics: MetricsSettings,
    pub summary: SummarySettings,
    pub reconnect: ReconnectPolicy,
}

/// Subscription parameters handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    pub endpoint: String,
    pub socket_type: String,
    /// Topic prefix filter; empty matches every topic.
    pub subscribe: String,
    /// Receive high-water-mark (messages buffered before the transport drops).
    pub receive_hwm: u32,
    /// `None` blocks until a part arrives.
    pub receive_timeout: Option<Duration>,
}

/// Soft capacity hints. Exceeding them is logged and counted, never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityHints {
    pub max_sources: usize,
    pub max_detections: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub report_interval: Duration,
}

/// Track/class summaries logged by `TrackAnalytics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummarySettings {
    pub enabled: bool,
    pub interval: Duration,
    /// Bound on remembered track ids before the set is cleared.
    pub max_tracked_ids: usize,
}

impl IngestConfig {
    /// Load from `path` (or `INGEST_CONFIG` when `path` is `None`), then
    /// apply environment overrides and validate.
    ///
    /// Without any file the built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("INGEST_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => IngestConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a TOML document directly (no environment overrides).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: IngestConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: IngestConfigFile) -> Self {
        let analytics = file.analytics.unwrap_or_default();
        let zmq = file.zmq.unwrap_or_default();
        let metrics = file.metrics.unwrap_or_default();
        let reconnect = file.reconnect.unwrap_or_default();

        let receive_timeout_ms = zmq.receive_timeout_ms.unwrap_or(DEFAULT_RECEIVE_TIMEOUT_MS);
        Self {
            bus: BusSettings {
                endpoint: zmq.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
                socket_type: zmq
                    .socket_type
                    .unwrap_or_else(|| DEFAULT_SOCKET_TYPE.to_string()),
                subscribe: zmq.subscribe.unwrap_or_default(),
                receive_hwm: zmq.rcvhwm.unwrap_or(DEFAULT_RCVHWM),
                receive_timeout: timeout_from_ms(receive_timeout_ms),
            },
            capacity: CapacityHints {
                max_sources: analytics.max_sources.unwrap_or(DEFAULT_MAX_SOURCES),
                max_detections: analytics.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            },
            metrics: MetricsSettings {
                enabled: metrics.enabled.unwrap_or(true),
                report_interval: Duration::from_secs(
                    metrics
                        .report_interval_secs
                        .unwrap_or(DEFAULT_REPORT_INTERVAL_SECS),
                ),
            },
            summary: SummarySettings {
                enabled: analytics.summary.unwrap_or(false),
                interval: Duration::from_secs(
                    analytics
                        .summary_interval_secs
                        .unwrap_or(DEFAULT_SUMMARY_INTERVAL_SECS),
                ),
                max_tracked_ids: analytics
                    .max_tracked_ids
                    .unwrap_or(DEFAULT_MAX_TRACKED_IDS),
            },
            reconnect: ReconnectPolicy {
                max_attempts: reconnect.max_attempts.unwrap_or(0),
                initial_backoff: Duration::from_millis(
                    reconnect
                        .initial_backoff_ms
                        .unwrap_or(DEFAULT_RECONNECT_INITIAL_MS),
                ),
                max_backoff: Duration::from_millis(
                    reconnect.max_backoff_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS),
                ),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(endpoint) = std::env::var("INGEST_ZMQ_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.bus.endpoint = endpoint;
            }
        }
        // An empty filter is meaningful (match all), so it is applied as-is.
        if let Ok(subscribe) = std::env::var("INGEST_ZMQ_SUBSCRIBE") {
            self.bus.subscribe = subscribe;
        }
        if let Ok(hwm) = std::env::var("INGEST_ZMQ_RCVHWM") {
            self.bus.receive_hwm = hwm
                .trim()
                .parse()
                .map_err(|_| anyhow!("INGEST_ZMQ_RCVHWM must be a positive integer"))?;
        }
        if let Ok(enabled) = std::env::var("INGEST_METRICS_ENABLED") {
            self.metrics.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("INGEST_METRICS_ENABLED must be true or false"))?;
        }
        if let Ok(secs) = std::env::var("INGEST_REPORT_INTERVAL_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("INGEST_REPORT_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.metrics.report_interval = Duration::from_secs(secs);
        }
        if let Ok(attempts) = std::env::var("INGEST_RECONNECT_MAX_ATTEMPTS") {
            self.reconnect.max_attempts = attempts
                .trim()
                .parse()
                .map_err(|_| anyhow!("INGEST_RECONNECT_MAX_ATTEMPTS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.bus.endpoint.trim().is_empty() {
            return Err(anyhow!("zmq endpoint must not be empty"));
        }
        self.bus.socket_type = self.bus.socket_type.to_lowercase();
        if self.bus.socket_type != "sub" {
            return Err(anyhow!(
                "unsupported zmq socket_type {:?} (only \"sub\" is supported)",
                self.bus.socket_type
            ));
        }
        if self.bus.receive_hwm == 0 || self.bus.receive_hwm > i32::MAX as u32 {
            return Err(anyhow!("zmq rcvhwm must be between 1 and {}", i32::MAX));
        }
        if self.metrics.report_interval.is_zero() {
            return Err(anyhow!("metrics report interval must be greater than zero"));
        }
        if self.summary.interval.is_zero() {
            return Err(anyhow!("analytics summary interval must be greater than zero"));
        }
        if self.summary.max_tracked_ids == 0 {
            return Err(anyhow!("analytics max_tracked_ids must be greater than zero"));
        }
        if self.reconnect.max_backoff < self.reconnect.initial_backoff {
            return Err(anyhow!(
                "reconnect max_backoff_ms must be >= initial_backoff_ms"
            ));
        }
        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from_file(IngestConfigFile::default())
    }
}

impl CapacityHints {
    /// True when `batch` has more sources, or a source has more detections,
    /// than the hints allow.
    pub fn exceeded_by(&self, batch: &DetectionBatch) -> bool {
        batch.source_count() > self.max_sources || batch.max_source_len() > self.max_detections
    }
}

fn read_config_file(path: &Path) -> Result<IngestConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Detection;

    #[test]
    fn defaults_match_documented_settings() {
        let cfg = IngestConfig::default();
        assert_eq!(cfg.bus.endpoint, "tcp://127.0.0.1:5555");
        assert_eq!(cfg.bus.subscribe, "");
        assert_eq!(cfg.bus.receive_hwm, 1000);
        assert_eq!(cfg.bus.receive_timeout, Some(Duration::from_millis(500)));
        assert_eq!(cfg.capacity.max_sources, 1);
        assert_eq!(cfg.capacity.max_detections, 16);
        assert!(cfg.metrics.enabled);
        assert_eq!(cfg.metrics.report_interval, Duration::from_secs(5));
        assert!(!cfg.summary.enabled);
        assert_eq!(cfg.reconnect.max_attempts, 0);
    }

    #[test]
    fn zero_timeout_means_blocking() {
        let cfg = IngestConfig::from_toml_str("[zmq]\nreceive_timeout_ms = 0\n").unwrap();
        assert_eq!(cfg.bus.receive_timeout, None);
    }

    #[test]
    fn rejects_non_sub_socket() {
        let err = IngestConfig::from_toml_str("[zmq]\nsocket_type = \"pull\"\n").unwrap_err();
        assert!(err.to_string().contains("socket_type"));
    }

    #[test]
    fn rejects_zero_hwm_and_interval() {
        assert!(IngestConfig::from_toml_str("[zmq]\nrcvhwm = 0\n").is_err());
        assert!(IngestConfig::from_toml_str("[metrics]\nreport_interval_secs = 0\n").is_err());
    }

    #[test]
    fn rejects_unknown_section() {
        assert!(IngestConfig::from_toml_str("[zmqq]\nendpoint = \"x\"\n").is_err());
    }

    #[test]
    fn rejects_unknown_key_inside_section() {
        for raw in [
            "[zmq]\nrcvhmw = 10\n",
            "[analytics]\nmax_source = 2\n",
            "[metrics]\nenable = false\n",
            "[reconnect]\nmax_attempt = 3\n",
        ] {
            let err = IngestConfig::from_toml_str(raw).unwrap_err();
            assert!(err.to_string().contains("unknown field"), "{raw}: {err}");
        }
    }

    #[test]
    fn track_limit_defaults_and_validates() {
        assert_eq!(
            IngestConfig::default().summary.max_tracked_ids,
            DEFAULT_MAX_TRACKED_IDS
        );
        let cfg = IngestConfig::from_toml_str("[analytics]\nmax_tracked_ids = 64\n").unwrap();
        assert_eq!(cfg.summary.max_tracked_ids, 64);
        assert!(IngestConfig::from_toml_str("[analytics]\nmax_tracked_ids = 0\n").is_err());
    }

    #[test]
    fn capacity_hints_flag_oversized_batches() {
        let hints = CapacityHints {
            max_sources: 1,
            max_detections: 2,
        };
        let mut batch = DetectionBatch::new();
        batch.insert("0", vec![Detection::new(1, 0); 2]);
        assert!(!hints.exceeded_by(&batch));

        batch.insert("1", Vec::new());
        assert!(hints.exceeded_by(&batch));

        let mut crowded = DetectionBatch::new();
        crowded.insert("0", vec![Detection::new(1, 0); 3]);
        assert!(hints.exceeded_by(&crowded));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool(" YES "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
