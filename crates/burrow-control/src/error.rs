//! Error types for the session and correlation engine

use std::time::Duration;
use thiserror::Error;

/// Outcome of a failed tunneled request, surfaced to the HTTP caller
#[derive(Debug, Error)]
pub enum TunnelError {
    /// No agent is attached
    #[error("no active tunnel")]
    NoActiveSession,

    /// The agent did not answer within the deadline
    #[error("timeout after {}s", .0.as_secs())]
    RequestTimeout(Duration),

    /// The agent connection dropped while the request was in flight
    #[error("tunnel disconnected")]
    SessionLost,

    /// The request could not be framed
    #[error("could not encode tunnel request: {0}")]
    Codec(#[from] burrow_proto::CodecError),
}

/// Errors from [`SessionRegistry::send`](crate::SessionRegistry::send)
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no active session")]
    NoActiveSession,

    /// The write failed; the session has been torn down
    #[error("transport write failed: {0}")]
    Transport(String),
}

/// Write failure reported by a [`SessionSink`](crate::SessionSink)
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SinkError(pub String);

impl SinkError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}
