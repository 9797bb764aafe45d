//! Tunnel Protocol Definitions
//!
//! Wire types exchanged between the relay and the agent over the persistent
//! WebSocket connection, plus the JSON codec used for every text frame.

pub mod codec;
pub mod messages;

pub use codec::{decode_reply, decode_request, encode_reply, encode_request, CodecError};
pub use messages::*;

/// Path of the agent upgrade endpoint on the relay
pub const UPGRADE_PATH: &str = "/ws";

/// Query parameter carrying the shared access token on upgrade
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Default time a relay waits for the agent to answer a tunneled request
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Notice sent to an agent connection displaced by a newer authenticated one
pub const SUPERSEDED_NOTICE: &str = "Connection interrupted by another client";

/// Notice sent to a connection presenting a bad access token
pub const UNAUTHORIZED_NOTICE: &str = "Unauthorized: Bad access token";

/// Notice sent when the relay keeps an existing session instead of taking it over
pub const CONFLICT_NOTICE: &str = "Conflict: another agent is already attached";
