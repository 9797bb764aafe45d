//! Session and request-correlation engine
//!
//! Owns the single agent connection, multiplexes tunneled requests over it
//! and routes replies back to the caller that is waiting for them.
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use correlator::RequestCorrelator;
pub use dispatcher::{DispatchEnd, InboundFrame, ResponseDispatcher};
pub use error::{SendError, SinkError, TunnelError};
pub use session::{
    Activation, ConnectionId, SessionInfo, SessionLostSignal, SessionRegistry, SessionSink,
    TakeoverPolicy,
};
