//! Burrow agent
//!
//! Holds the outbound connection to the relay, forwards every tunneled request
//! to the private HTTP service and sends the service's answer back.

pub mod agent;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod reconnect;

pub use agent::Agent;
pub use config::AgentConfig;
pub use error::AgentError;
pub use forwarder::{ForwarderError, LocalForwarder};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectManager};
