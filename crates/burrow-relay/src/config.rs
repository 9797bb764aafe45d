//! Relay configuration

use burrow_control::TakeoverPolicy;
use burrow_proto::DEFAULT_REQUEST_TIMEOUT_SECS;
use std::net::SocketAddr;
use std::time::Duration;

/// Default cap on tunneled request bodies (16 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Relay server configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address serving both the public tunnel and the agent upgrade endpoint
    pub bind_addr: SocketAddr,
    /// How long a public request waits for the agent's reply
    pub request_timeout: Duration,
    /// Drop an agent connection that sends nothing for this long
    pub idle_timeout: Option<Duration>,
    /// Interval between keepalive pings to the agent
    pub keepalive_interval: Option<Duration>,
    /// Largest accepted public request body
    pub max_body_bytes: usize,
    pub takeover_policy: TakeoverPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            idle_timeout: Some(Duration::from_secs(90)),
            keepalive_interval: Some(Duration::from_secs(30)),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            takeover_policy: TakeoverPolicy::Preempt,
        }
    }
}
