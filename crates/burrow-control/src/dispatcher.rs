//! Read loop for an agent connection
//!
//! Decodes every inbound frame as a reply and routes it to the correlator.
//! Frames that cannot be decoded are logged and skipped. When the loop ends,
//! for whatever reason, the connection is deactivated in the registry.

use burrow_proto::decode_reply;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::correlator::RequestCorrelator;
use crate::session::{ConnectionId, SessionRegistry};

/// Transport-neutral view of a frame read from the agent connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close(Option<String>),
}

/// Why the read loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEnd {
    StreamEnded,
    PeerClosed,
    ReadError(String),
    IdleTimeout,
}

pub struct ResponseDispatcher {
    registry: Arc<SessionRegistry>,
    correlator: RequestCorrelator,
    idle_timeout: Option<Duration>,
}

impl ResponseDispatcher {
    pub fn new(registry: Arc<SessionRegistry>, correlator: RequestCorrelator) -> Self {
        Self {
            registry,
            correlator,
            idle_timeout: None,
        }
    }

    /// Give up on a connection that stays silent for `idle_timeout`
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Consume `frames` until the connection ends, then deactivate it
    pub async fn run<S, E>(&self, connection_id: ConnectionId, mut frames: S) -> DispatchEnd
    where
        S: Stream<Item = Result<InboundFrame, E>> + Unpin,
        E: Display,
    {
        let end = loop {
            let next = match self.idle_timeout {
                Some(idle) => match tokio::time::timeout(idle, frames.next()).await {
                    Ok(next) => next,
                    Err(_) => break DispatchEnd::IdleTimeout,
                },
                None => frames.next().await,
            };

            match next {
                None => break DispatchEnd::StreamEnded,
                Some(Err(e)) => break DispatchEnd::ReadError(e.to_string()),
                Some(Ok(InboundFrame::Text(text))) => self.dispatch(connection_id, text.as_bytes()),
                Some(Ok(InboundFrame::Binary(data))) => self.dispatch(connection_id, &data),
                Some(Ok(InboundFrame::Ping | InboundFrame::Pong)) => {
                    trace!(connection_id, "Agent keepalive");
                }
                Some(Ok(InboundFrame::Close(reason))) => {
                    debug!(connection_id, reason = ?reason, "Agent sent close frame");
                    break DispatchEnd::PeerClosed;
                }
            }
        };

        match &end {
            DispatchEnd::StreamEnded | DispatchEnd::PeerClosed => {
                info!(connection_id, "Agent connection closed")
            }
            DispatchEnd::ReadError(e) => {
                warn!(connection_id, error = %e, "Agent connection read failed")
            }
            DispatchEnd::IdleTimeout => warn!(
                connection_id,
                idle_secs = self.idle_timeout.map(|d| d.as_secs()).unwrap_or_default(),
                "Agent connection idle, dropping"
            ),
        }

        self.registry.deactivate(connection_id).await;
        end
    }

    fn dispatch(&self, connection_id: ConnectionId, frame: &[u8]) {
        match decode_reply(frame) {
            Ok(reply) => {
                trace!(connection_id, request_id = %reply.id, status = reply.status_code, "Reply from agent");
                self.correlator.resolve(reply);
            }
            Err(e) => {
                warn!(connection_id, error = %e, "Discarding malformed frame from agent");
            }
        }
    }
}
