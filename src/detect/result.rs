use std::collections::BTreeMap;

/// One tracked object inside a payload.
///
/// Only `track_id` and `class_id` are required. The producer also emits
/// `confidence` and `frame_num`; they are kept when present and well-typed.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub track_id: i64,
    pub class_id: i64,
    pub confidence: Option<f64>,
    pub frame_num: Option<u64>,
}

impl Detection {
    pub fn new(track_id: i64, class_id: i64) -> Self {
        Self {
            track_id,
            class_id,
            confidence: None,
            frame_num: None,
        }
    }
}

/// Decoded payload: source key -> detections, in array order.
///
/// Duplicate track ids are legal. Key order carries no meaning.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionBatch {
    sources: BTreeMap<String, Vec<Detection>>,
}

impl DetectionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: impl Into<String>, detections: Vec<Detection>) {
        self.sources.insert(source.into(), detections);
    }

    /// Add detections to `source`, after any it already has.
    pub fn append(&mut self, source: impl Into<String>, detections: Vec<Detection>) {
        self.sources
            .entry(source.into())
            .or_default()
            .extend(detections);
    }

    pub fn get(&self, source: &str) -> Option<&[Detection]> {
        self.sources.get(source).map(Vec::as_slice)
    }

    pub fn contains_source(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = (&str, &[Detection])> {
        self.sources
            .iter()
            .map(|(key, dets)| (key.as_str(), dets.as_slice()))
    }

    pub fn detections(&self) -> impl Iterator<Item = &Detection> {
        self.sources.values().flatten()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn detection_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    /// Largest per-source detection count (0 for an empty batch).
    pub fn max_source_len(&self) -> usize {
        self.sources.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
