//! Two-part bus frames.
//!
//! A `Frame` only exists once BOTH parts have been received: the topic part
//! and the payload part. The ingestion loop never builds a `Frame` from a
//! topic alone, so the decoder can never observe half a message.

/// One logical unit of work consumed from the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Opaque stream/source label (the publisher's topic part).
    pub topic: Vec<u8>,
    /// Opaque payload, expected to be UTF-8 JSON.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(topic: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Topic rendered for log lines. Non-UTF-8 bytes are replaced.
    pub fn topic_lossy(&self) -> String {
        String::from_utf8_lossy(&self.topic).into_owned()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
