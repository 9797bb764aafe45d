use crate::reconnect::ReconnectError;
use thiserror::Error;

/// Reasons the agent stops
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(String),

    #[error("Invalid local service URL: {0}")]
    InvalidLocalUrl(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// The relay refused the access token; retrying would not help
    #[error("Relay rejected the access token")]
    Unauthorized,

    #[error("Failed to connect to relay: {0}")]
    Connect(String),

    /// Another agent with a valid token took over the tunnel
    #[error("Connection interrupted by another agent")]
    Superseded,

    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}
