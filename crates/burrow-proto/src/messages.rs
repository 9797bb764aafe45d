//! Protocol message types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Multi-valued string map used for headers and query parameters
pub type MultiMap = BTreeMap<String, Vec<String>>;

/// HTTP request forwarded from the relay to the agent
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelRequest {
    pub method: String,
    /// Path of the public request (without the query string)
    pub targeted_route: String,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: MultiMap,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub params: MultiMap,
    #[serde(default)]
    pub body: String,
    /// Correlation identity, assigned by the relay
    pub id: String,
}

impl TunnelRequest {
    /// Create a request for `method` on `targeted_route` with no headers, params or body.
    ///
    /// The correlation id is left empty; the relay assigns it on submission.
    pub fn new(method: impl Into<String>, targeted_route: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            targeted_route: targeted_route.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// Reply sent by the agent for a previously received [`TunnelRequest`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelReply {
    pub status_code: u16,
    #[serde(default, deserialize_with = "nullable::deserialize")]
    pub headers: MultiMap,
    #[serde(default)]
    pub body: String,
    /// Correlation identity copied from the request
    pub id: String,
}

impl TunnelReply {
    pub fn new(id: impl Into<String>, status_code: u16) -> Self {
        Self {
            status_code,
            headers: MultiMap::new(),
            body: String::new(),
            id: id.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Plain-text reply used by the agent when the private service cannot be reached
    pub fn error(id: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self::new(id, status_code)
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_body(message)
    }
}

// Header and param maps may arrive as `null` from agents that never populated them
mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Default + Deserialize<'de>,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }
}
