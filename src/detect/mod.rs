mod decoder;
mod result;

pub use decoder::{
    decode_payload, extract_detection, DecodeOutcome, Decoded, ParseFailure, SkipReason,
};
pub use result::{Detection, DetectionBatch};
