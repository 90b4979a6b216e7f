//! Track/class analytics over decoded batches.
//!
//! Optional: enabled by `analytics.summary`. Each source key in a batch
//! counts as one source frame. Interval counters reset after every summary;
//! cumulative counters never do.
//!
//! Track ids are remembered in a set bounded by `max_tracked_ids`. Trackers
//! hand out fresh ids for as long as the publisher runs, so when the set is
//! full it is cleared and starts over. A lookup of a remembered id is a hit,
//! a first sighting is a miss. After a clear, ids seen before it count as
//! misses (and as unique tracks) again.

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use crate::detect::DetectionBatch;

/// Default bound on remembered track ids.
pub const DEFAULT_MAX_TRACKED_IDS: usize = 100_000;

#[derive(Clone, Debug)]
pub struct TrackAnalytics {
    interval: Duration,
    interval_start: Instant,
    interval_frames: u64,
    frames: u64,
    total_objects: u64,
    seen_tracks: HashSet<i64>,
    max_tracked_ids: usize,
    track_hits: u64,
    track_misses: u64,
    track_resets: u64,
    class_counts: BTreeMap<i64, u64>,
}

/// Track id lookups against the remembered set.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrackCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Times the remembered set was cleared after reaching its bound.
    pub resets: u64,
}

impl TrackCacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups that were hits; 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.lookups();
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

/// Periodic analytics summary.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyticsSummary {
    pub elapsed: Duration,
    pub interval_frames: u64,
    pub frames: u64,
    pub total_objects: u64,
    pub unique_tracks: u64,
    pub avg_objects_per_frame: f64,
    pub processing_fps: f64,
    pub track_cache: TrackCacheStats,
    /// (class_id, detections) ordered by class id.
    pub class_counts: Vec<(i64, u64)>,
}

/// Totals logged once ingestion stops.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalSummary {
    pub frames: u64,
    pub total_objects: u64,
    pub unique_tracks: u64,
    pub avg_objects_per_frame: f64,
    pub track_cache: TrackCacheStats,
}

impl TrackAnalytics {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            interval,
            interval_start: start,
            interval_frames: 0,
            frames: 0,
            total_objects: 0,
            seen_tracks: HashSet::new(),
            max_tracked_ids: DEFAULT_MAX_TRACKED_IDS,
            track_hits: 0,
            track_misses: 0,
            track_resets: 0,
            class_counts: BTreeMap::new(),
        }
    }

    /// Bound the remembered track id set. Zero is treated as one.
    pub fn with_track_limit(mut self, max_tracked_ids: usize) -> Self {
        self.max_tracked_ids = max_tracked_ids.max(1);
        self
    }

    pub fn track_cache(&self) -> TrackCacheStats {
        TrackCacheStats {
            hits: self.track_hits,
            misses: self.track_misses,
            resets: self.track_resets,
        }
    }

    pub fn observe(&mut self, batch: &DetectionBatch) {
        for (source, detections) in batch.sources() {
            self.frames += 1;
            self.interval_frames += 1;
            self.total_objects += detections.len() as u64;
            for det in detections {
                self.remember_track(det.track_id);
                *self.class_counts.entry(det.class_id).or_insert(0) += 1;
            }
            log::trace!(
                "[source {}] frame {}: {} objects",
                source,
                self.frames,
                detections.len()
            );
        }
    }

    pub fn poll_summary(&mut self) -> Option<AnalyticsSummary> {
        self.poll_summary_at(Instant::now())
    }

    /// Summary when the interval has elapsed; resets interval counters.
    pub fn poll_summary_at(&mut self, now: Instant) -> Option<AnalyticsSummary> {
        let elapsed = now.saturating_duration_since(self.interval_start);
        if elapsed < self.interval {
            return None;
        }
        let summary = AnalyticsSummary {
            elapsed,
            interval_frames: self.interval_frames,
            frames: self.frames,
            total_objects: self.total_objects,
            unique_tracks: self.track_misses,
            avg_objects_per_frame: self.avg_objects_per_frame(),
            processing_fps: per_second(self.interval_frames, elapsed),
            track_cache: self.track_cache(),
            class_counts: self.class_counts.iter().map(|(k, v)| (*k, *v)).collect(),
        };
        self.interval_start = now;
        self.interval_frames = 0;
        Some(summary)
    }

    /// `None` when nothing was ever observed.
    pub fn final_summary(&self) -> Option<FinalSummary> {
        if self.frames == 0 {
            return None;
        }
        Some(FinalSummary {
            frames: self.frames,
            total_objects: self.total_objects,
            unique_tracks: self.track_misses,
            avg_objects_per_frame: self.avg_objects_per_frame(),
            track_cache: self.track_cache(),
        })
    }

    fn remember_track(&mut self, track_id: i64) {
        if self.seen_tracks.contains(&track_id) {
            self.track_hits += 1;
            return;
        }
        if self.seen_tracks.len() >= self.max_tracked_ids {
            log::debug!(
                "track id set reached {} entries, clearing",
                self.seen_tracks.len()
            );
            self.seen_tracks.clear();
            self.track_resets += 1;
        }
        self.seen_tracks.insert(track_id);
        self.track_misses += 1;
    }

    fn avg_objects_per_frame(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        self.total_objects as f64 / self.frames as f64
    }
}

impl AnalyticsSummary {
    pub fn log(&self) {
        log::info!(
            "analytics summary over {:.1}s",
            self.elapsed.as_secs_f64()
        );
        log::info!("  frames processed: {}", self.interval_frames);
        log::info!("  processing rate: {:.2} FPS", self.processing_fps);
        log::info!("  total objects tracked: {}", self.unique_tracks);
        log::info!("  avg objects per frame: {:.2}", self.avg_objects_per_frame);
        self.track_cache.log();
        log::info!("  class distribution:");
        for (class_id, count) in &self.class_counts {
            log::info!("    class {}: {} detections", class_id, count);
        }
    }
}

impl FinalSummary {
    pub fn log(&self) {
        log::info!("final analytics summary");
        log::info!("  total frames: {}", self.frames);
        log::info!("  total objects: {}", self.total_objects);
        log::info!("  unique tracks: {}", self.unique_tracks);
        log::info!("  avg objects per frame: {:.2}", self.avg_objects_per_frame);
        self.track_cache.log();
    }
}

impl TrackCacheStats {
    fn log(&self) {
        log::info!(
            "  track cache: hits={} misses={} hit rate={:.2}%",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0
        );
        if self.resets > 0 {
            log::info!("  track id set cleared {} time(s)", self.resets);
        }
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    count as f64 / secs
}
