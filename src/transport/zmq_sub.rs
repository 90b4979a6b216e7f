//! ZeroMQ SUB socket subscriber.

use anyhow::{Context, Result};
use std::time::Duration;

use super::{Part, RecvError, Subscriber};
use crate::config::BusSettings;

/// SUB socket attached to a publisher endpoint.
pub struct ZmqSubscriber {
    // Kept alive for the socket's lifetime.
    _context: zmq::Context,
    socket: zmq::Socket,
    endpoint: String,
}

impl ZmqSubscriber {
    /// Create a SUB socket with its own context and connect it.
    pub fn connect(settings: &BusSettings) -> Result<Self> {
        Self::connect_with_context(zmq::Context::new(), settings)
    }

    /// Connect using a caller-supplied context (needed for `inproc://`).
    ///
    /// Options are applied before `connect`, in the order HWM, filter,
    /// timeout, so they hold for the very first message.
    pub fn connect_with_context(context: zmq::Context, settings: &BusSettings) -> Result<Self> {
        let socket = context.socket(zmq::SUB).context("create SUB socket")?;
        socket.set_linger(0).context("set linger")?;
        socket
            .set_rcvhwm(settings.receive_hwm as i32)
            .context("set receive high-water-mark")?;
        socket
            .set_subscribe(settings.subscribe.as_bytes())
            .context("set subscribe filter")?;
        socket
            .set_rcvtimeo(timeout_ms(settings.receive_timeout))
            .context("set receive timeout")?;
        socket
            .connect(&settings.endpoint)
            .with_context(|| format!("connect to {}", settings.endpoint))?;

        log::info!(
            "ZMQ SUB connected to {} (filter={:?}, rcvhwm={}, timeout={:?})",
            settings.endpoint,
            settings.subscribe,
            settings.receive_hwm,
            settings.receive_timeout
        );

        Ok(Self {
            _context: context,
            socket,
            endpoint: settings.endpoint.clone(),
        })
    }
}

impl Subscriber for ZmqSubscriber {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn receive_part(&mut self) -> Result<Part, RecvError> {
        let mut msg = zmq::Message::new();
        self.socket.recv(&mut msg, 0)?;
        let more = msg.get_more();
        Ok(Part {
            data: msg.to_vec(),
            more,
        })
    }
}

impl From<zmq::Error> for RecvError {
    fn from(err: zmq::Error) -> Self {
        match err {
            zmq::Error::EAGAIN => Self::Timeout,
            zmq::Error::EINTR => Self::Interrupted,
            zmq::Error::ETERM | zmq::Error::ENOTSOCK => Self::Closed,
            other => Self::Fault(other.to_string()),
        }
    }
}

/// ZMQ_RCVTIMEO value: -1 blocks forever.
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(d) => d.as_millis().clamp(1, i32::MAX as u128) as i32,
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(endpoint: &str, timeout_ms: u64) -> BusSettings {
        BusSettings {
            endpoint: endpoint.to_string(),
            socket_type: "sub".to_string(),
            subscribe: String::new(),
            receive_hwm: 1000,
            receive_timeout: Some(Duration::from_millis(timeout_ms)),
        }
    }

    #[test]
    fn timeout_mapping() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_micros(10))), 1);
    }

    #[test]
    fn error_mapping() {
        assert_eq!(RecvError::from(zmq::Error::EAGAIN), RecvError::Timeout);
        assert_eq!(RecvError::from(zmq::Error::EINTR), RecvError::Interrupted);
        assert_eq!(RecvError::from(zmq::Error::ETERM), RecvError::Closed);
        assert!(matches!(
            RecvError::from(zmq::Error::EINVAL),
            RecvError::Fault(_)
        ));
    }

    #[test]
    fn invalid_endpoint_fails_at_connect() {
        assert!(ZmqSubscriber::connect(&settings("not-an-endpoint", 10)).is_err());
    }

    #[test]
    fn silent_bus_times_out() {
        let ctx = zmq::Context::new();
        let mut sub =
            ZmqSubscriber::connect_with_context(ctx, &settings("inproc://silent-bus", 20))
                .expect("connect");
        assert_eq!(sub.endpoint(), "inproc://silent-bus");
        assert_eq!(sub.receive_part(), Err(RecvError::Timeout));
    }

    #[test]
    fn receives_topic_then_payload() {
        let ctx = zmq::Context::new();
        let publisher = ctx.socket(zmq::PUB).expect("pub socket");
        publisher.bind("inproc://two-part").expect("bind");

        let mut sub =
            ZmqSubscriber::connect_with_context(ctx.clone(), &settings("inproc://two-part", 20))
                .expect("connect");

        // PUB drops messages until the subscription has propagated.
        let mut topic = None;
        for _ in 0..200 {
            publisher
                .send_multipart([&b"inference"[..], &br#"{"0": []}"#[..]], 0)
                .expect("publish");
            match sub.receive_part() {
                Ok(part) => {
                    topic = Some(part);
                    break;
                }
                Err(RecvError::Timeout) => continue,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }

        let topic = topic.expect("subscription never became active");
        assert_eq!(topic.data, b"inference");
        assert!(topic.more);

        let payload = sub.receive_part().expect("payload part");
        assert_eq!(payload.data, br#"{"0": []}"#);
        assert!(!payload.more);
    }

    #[test]
    fn subscribe_filter_is_a_topic_prefix() {
        let ctx = zmq::Context::new();
        let publisher = ctx.socket(zmq::PUB).expect("pub socket");
        publisher.bind("inproc://prefix-filter").expect("bind");

        let mut filtered = settings("inproc://prefix-filter", 20);
        filtered.subscribe = "inf".to_string();
        let mut sub =
            ZmqSubscriber::connect_with_context(ctx.clone(), &filtered).expect("connect");

        // "other" is always published first, so it would arrive first if the
        // filter let it through.
        let mut topics = Vec::new();
        for _ in 0..200 {
            publisher
                .send_multipart([&b"other"[..], &b"{}"[..]], 0)
                .expect("publish other");
            publisher
                .send_multipart([&b"inference"[..], &b"{}"[..]], 0)
                .expect("publish inference");
            match sub.receive_part() {
                Ok(part) => {
                    topics.push(part.data);
                    break;
                }
                Err(RecvError::Timeout) => continue,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
        assert!(!topics.is_empty(), "subscription never became active");
        sub.receive_part().expect("payload part");

        loop {
            match sub.receive_part() {
                Ok(topic) => {
                    assert!(topic.more);
                    topics.push(topic.data);
                    sub.receive_part().expect("payload part");
                }
                Err(RecvError::Timeout) => break,
                Err(e) => panic!("unexpected receive error: {e}"),
            }
        }
        assert!(topics.iter().all(|t| t.as_slice() == b"inference"));
    }
}
