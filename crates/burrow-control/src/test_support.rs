//! In-memory sink and helpers shared by unit tests

use async_trait::async_trait;
use burrow_auth::CredentialVerifier;
use burrow_proto::{decode_request, TunnelRequest};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::SinkError;
use crate::session::{ConnectionId, SessionRegistry, SessionSink, TakeoverPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Text(String),
    Ping,
    Close(String),
}

/// Records everything written to it on an unbounded channel
pub struct ChannelSink {
    events: mpsc::UnboundedSender<SinkEvent>,
    fail_writes: Arc<AtomicBool>,
    closed: bool,
}

impl ChannelSink {
    fn check(&self) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::new("sink closed"));
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SinkError::new("broken pipe"));
        }
        Ok(())
    }

    fn emit(&self, event: SinkEvent) -> Result<(), SinkError> {
        self.events
            .send(event)
            .map_err(|_| SinkError::new("receiver dropped"))
    }
}

#[async_trait]
impl SessionSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.check()?;
        self.emit(SinkEvent::Text(text))
    }

    async fn send_ping(&mut self) -> Result<(), SinkError> {
        self.check()?;
        self.emit(SinkEvent::Ping)
    }

    async fn close(&mut self, reason: &str) -> Result<(), SinkError> {
        self.check()?;
        self.closed = true;
        self.emit(SinkEvent::Close(reason.to_string()))
    }
}

pub fn channel_sink() -> (
    ChannelSink,
    mpsc::UnboundedReceiver<SinkEvent>,
    Arc<AtomicBool>,
) {
    let (events, rx) = mpsc::unbounded_channel();
    let fail_writes = Arc::new(AtomicBool::new(false));
    let sink = ChannelSink {
        events,
        fail_writes: fail_writes.clone(),
        closed: false,
    };
    (sink, rx, fail_writes)
}

/// Plain string comparison, keeps tests independent of argon2 cost
pub struct StaticVerifier(pub &'static str);

impl CredentialVerifier for StaticVerifier {
    fn verify(&self, candidate: &str) -> bool {
        !candidate.is_empty() && candidate == self.0
    }
}

pub fn registry(policy: TakeoverPolicy) -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::with_policy(
        Arc::new(StaticVerifier("secret")),
        policy,
    ))
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// Attach a fresh channel sink with the valid credential
pub async fn activate(
    registry: &SessionRegistry,
    remote_addr: SocketAddr,
) -> (
    ConnectionId,
    mpsc::UnboundedReceiver<SinkEvent>,
    Arc<AtomicBool>,
) {
    let (sink, events, fail_writes) = channel_sink();
    let connection_id = registry
        .try_activate(Box::new(sink), "secret", remote_addr)
        .await
        .connection_id()
        .expect("valid credential should activate");
    (connection_id, events, fail_writes)
}

/// Next request frame the relay wrote to the agent
pub async fn next_request(events: &mut mpsc::UnboundedReceiver<SinkEvent>) -> TunnelRequest {
    loop {
        match events.recv().await {
            Some(SinkEvent::Text(frame)) => {
                return decode_request(frame.as_bytes()).expect("relay wrote a valid request")
            }
            Some(_) => continue,
            None => panic!("sink dropped before a request was written"),
        }
    }
}
