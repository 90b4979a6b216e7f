//! Bus transport abstractions.
//!
//! The ingestion loop consumes the bus through the `Subscriber` capability
//! set only: one blocking `receive_part` call per message part. Connecting,
//! the subscribe filter, and the receive high-water-mark are applied when a
//! subscriber is constructed (see `ZmqSubscriber::connect`).

mod zmq_sub;

pub use zmq_sub::ZmqSubscriber;

/// One part of a multi-part bus message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub data: Vec<u8>,
    /// More parts of the same message follow.
    pub more: bool,
}

impl Part {
    pub fn new(data: impl Into<Vec<u8>>, more: bool) -> Self {
        Self {
            data: data.into(),
            more,
        }
    }
}

/// Receive failure, classified so the loop can decide what to do.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The stream or its context was shut down.
    #[error("stream closed")]
    Closed,
    /// The configured receive timeout elapsed with nothing to read.
    #[error("receive timed out")]
    Timeout,
    /// A signal interrupted the blocking call.
    #[error("receive interrupted")]
    Interrupted,
    #[error("transport fault: {0}")]
    Fault(String),
}

/// Subscriber side of a publish/subscribe bus.
///
/// The subscriber is exclusively owned by one ingestion loop; nothing else
/// reads from it or closes it while the loop runs.
pub trait Subscriber: Send {
    /// Endpoint this subscriber is attached to (for log lines).
    fn endpoint(&self) -> &str;

    /// Receive the next message part. Blocks up to the configured timeout.
    fn receive_part(&mut self) -> Result<Part, RecvError>;
}

impl<S: Subscriber + ?Sized> Subscriber for Box<S> {
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }

    fn receive_part(&mut self) -> Result<Part, RecvError> {
        (**self).receive_part()
    }
}
