//! Tolerant payload decoder.
//!
//! Expected payload shape (one member per source):
//! `{ "<source>": [ { "track_id": 1, "class_id": 2, ... }, ... ], ... }`
//!
//! Nothing here returns an error. Malformed input degrades to a smaller (or
//! empty) batch plus an outcome describing what was dropped:
//! - invalid JSON or a non-object top level: empty batch, `ParseFailed`
//! - a member whose value is not an array: member skipped
//! - an element without integer `track_id`/`class_id`: element skipped
//!
//! Every top-level member is walked, repeated keys included: detections under
//! a repeated source key are appended to that source in document order.

use serde::de::{self, Deserialize, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};
use std::fmt;

use super::result::{Detection, DetectionBatch};

/// Why a whole payload was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseFailure {
    /// Not syntactically valid JSON (includes invalid UTF-8).
    InvalidJson(String),
    /// Valid JSON, but the top level is not an object.
    NotAnObject(&'static str),
}

/// Why a single array element was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotAnObject,
    MissingField(&'static str),
    WrongType(&'static str),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    Parsed {
        skipped_members: usize,
        skipped_detections: usize,
    },
    ParseFailed(ParseFailure),
}

/// Result of decoding one payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Decoded {
    pub batch: DetectionBatch,
    pub outcome: DecodeOutcome,
}

impl Decoded {
    fn failed(failure: ParseFailure) -> Self {
        Self {
            batch: DetectionBatch::new(),
            outcome: DecodeOutcome::ParseFailed(failure),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self.outcome, DecodeOutcome::Parsed { .. })
    }

    pub fn skipped_detections(&self) -> usize {
        match self.outcome {
            DecodeOutcome::Parsed {
                skipped_detections, ..
            } => skipped_detections,
            DecodeOutcome::ParseFailed(_) => 0,
        }
    }
}

/// Decode a raw payload into a `DetectionBatch`.
///
/// Holds no state between calls.
pub fn decode_payload(payload: &[u8]) -> Decoded {
    let doc: Document = match serde_json::from_slice(payload) {
        Ok(doc) => doc,
        Err(e) => {
            log::debug!("payload dropped: invalid JSON ({})", e);
            return Decoded::failed(ParseFailure::InvalidJson(e.to_string()));
        }
    };

    match doc {
        Document::Members(members) => decode_members(members),
        Document::Other(kind) => {
            log::debug!("payload dropped: top level is {}, not an object", kind);
            Decoded::failed(ParseFailure::NotAnObject(kind))
        }
    }
}

fn decode_members(members: Vec<(String, Value)>) -> Decoded {
    let mut batch = DetectionBatch::new();
    let mut skipped_members = 0;
    let mut skipped_detections = 0;

    for (source, value) in members {
        let elements = match value {
            Value::Array(elements) => elements,
            other => {
                log::debug!(
                    "member {:?} skipped: {} is not an array",
                    source,
                    json_kind(&other)
                );
                skipped_members += 1;
                continue;
            }
        };

        let mut detections = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            match extract_detection(element) {
                Ok(det) => detections.push(det),
                Err(reason) => {
                    log::debug!("member {:?}[{}] skipped: {:?}", source, index, reason);
                    skipped_detections += 1;
                }
            }
        }
        batch.append(source, detections);
    }

    Decoded {
        batch,
        outcome: DecodeOutcome::Parsed {
            skipped_members,
            skipped_detections,
        },
    }
}

/// Checked extraction of one detection element.
pub fn extract_detection(element: &Value) -> Result<Detection, SkipReason> {
    let Value::Object(fields) = element else {
        return Err(SkipReason::NotAnObject);
    };

    let track_id = required_int(fields, "track_id")?;
    let class_id = required_int(fields, "class_id")?;

    Ok(Detection {
        track_id,
        class_id,
        confidence: fields.get("confidence").and_then(Value::as_f64),
        frame_num: fields.get("frame_num").and_then(Value::as_u64),
    })
}

fn required_int(fields: &Map<String, Value>, name: &'static str) -> Result<i64, SkipReason> {
    fields
        .get(name)
        .ok_or(SkipReason::MissingField(name))?
        .as_i64()
        .ok_or(SkipReason::WrongType(name))
}

/// Top-level document. Object members are kept as a list so that repeated
/// keys survive; anything else is reduced to its kind.
enum Document {
    Members(Vec<(String, Value)>),
    Other(&'static str),
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(DocumentVisitor)
    }
}

struct DocumentVisitor;

impl<'de> Visitor<'de> for DocumentVisitor {
    type Value = Document;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Document, A::Error> {
        let mut members = Vec::new();
        while let Some(entry) = map.next_entry::<String, Value>()? {
            members.push(entry);
        }
        Ok(Document::Members(members))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Document, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Document::Other("an array"))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Document, E> {
        Ok(Document::Other("null"))
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Document, E> {
        Ok(Document::Other("a bool"))
    }

    fn visit_i64<E: de::Error>(self, _v: i64) -> Result<Document, E> {
        Ok(Document::Other("a number"))
    }

    fn visit_u64<E: de::Error>(self, _v: u64) -> Result<Document, E> {
        Ok(Document::Other("a number"))
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> Result<Document, E> {
        Ok(Document::Other("a number"))
    }

    fn visit_str<E: de::Error>(self, _v: &str) -> Result<Document, E> {
        Ok(Document::Other("a string"))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
