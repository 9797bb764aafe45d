//! Agent configuration

use burrow_proto::{TOKEN_QUERY_PARAM, UPGRADE_PATH};
use std::time::Duration;
use url::Url;

use crate::error::AgentError;
use crate::reconnect::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base URL of the relay (`ws://`, `wss://`, `http://` or `https://`)
    pub relay_url: String,
    pub token: String,
    /// Base URL of the private service requests are forwarded to
    pub local_url: String,
    /// Per-request timeout towards the private service
    pub local_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_url: String::new(),
            token: String::new(),
            local_url: "http://127.0.0.1:3000".to_string(),
            local_timeout: Duration::from_secs(55),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl AgentConfig {
    /// WebSocket URL of the relay's upgrade endpoint, token included
    pub fn connect_url(&self) -> Result<Url, AgentError> {
        let mut url = Url::parse(&self.relay_url)
            .map_err(|e| AgentError::InvalidRelayUrl(format!("{}: {}", self.relay_url, e)))?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(AgentError::InvalidRelayUrl(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| AgentError::InvalidRelayUrl(self.relay_url.clone()))?;

        if !url.path().ends_with(UPGRADE_PATH) {
            let path = format!("{}{}", url.path().trim_end_matches('/'), UPGRADE_PATH);
            url.set_path(&path);
        }
        url.set_query(None);
        url.query_pairs_mut()
            .append_pair(TOKEN_QUERY_PARAM, &self.token);

        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(relay_url: &str, token: &str) -> AgentConfig {
        AgentConfig {
            relay_url: relay_url.to_string(),
            token: token.to_string(),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_connect_url_from_http_base() {
        let url = config("http://relay.example.com:8080", "abc").connect_url().unwrap();
        assert_eq!(url.as_str(), "ws://relay.example.com:8080/ws?token=abc");
    }

    #[test]
    fn test_connect_url_tls_and_prefix() {
        let url = config("https://example.com/tunnel/", "abc").connect_url().unwrap();
        assert_eq!(url.as_str(), "wss://example.com/tunnel/ws?token=abc");
    }

    #[test]
    fn test_connect_url_keeps_explicit_upgrade_path() {
        let url = config("ws://127.0.0.1:9000/ws", "abc").connect_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/ws?token=abc");
    }

    #[test]
    fn test_connect_url_encodes_token() {
        let url = config("ws://relay", "a b&c=d").connect_url().unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c%3Dd"));
    }

    #[test]
    fn test_connect_url_rejects_other_schemes() {
        assert!(matches!(
            config("ftp://relay", "abc").connect_url(),
            Err(AgentError::InvalidRelayUrl(_))
        ));
        assert!(matches!(
            config("not a url", "abc").connect_url(),
            Err(AgentError::InvalidRelayUrl(_))
        ));
    }
}
