//! Forwards tunneled requests to the private HTTP service

use burrow_proto::{TunnelReply, TunnelRequest};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::error::AgentError;

/// Request headers that describe the relay hop and must not reach the service
const SKIPPED_HEADERS: [&str; 10] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "content-length",
    // Bodies travel as text; ask for an unencoded response
    "accept-encoding",
];

/// Errors that can occur while calling the private service
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Local service request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP client bound to the private service's base URL
#[derive(Debug, Clone)]
pub struct LocalForwarder {
    client: Client,
    base: Url,
}

impl LocalForwarder {
    pub fn new(local_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let base = Url::parse(local_url)
            .map_err(|e| AgentError::InvalidLocalUrl(format!("{}: {}", local_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(AgentError::InvalidLocalUrl(format!(
                "unsupported scheme '{}'",
                base.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AgentError::HttpClient(e.to_string()))?;

        Ok(Self { client, base })
    }

    /// Service URL for a tunneled request: base path + route + query
    pub fn target_url(&self, request: &TunnelRequest) -> Url {
        let mut url = self.base.clone();
        let route = if request.targeted_route.starts_with('/') {
            request.targeted_route.clone()
        } else {
            format!("/{}", request.targeted_route)
        };
        url.set_path(&format!("{}{}", self.base.path().trim_end_matches('/'), route));
        url.set_query(None);

        if !request.params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, values) in &request.params {
                for value in values {
                    query.append_pair(name, value);
                }
            }
        }
        url
    }

    /// Call the service; failures become a `502` reply carrying the same id
    pub async fn forward(&self, request: TunnelRequest) -> TunnelReply {
        let id = request.id.clone();
        match self.try_forward(request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(request_id = %id, error = %e, "Forwarding to local service failed");
                TunnelReply::error(id, 502, format!("local service unavailable: {}", e))
            }
        }
    }

    async fn try_forward(&self, request: TunnelRequest) -> Result<TunnelReply, ForwarderError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| ForwarderError::InvalidMethod(request.method.clone()))?;
        let url = self.target_url(&request);
        let headers = forwarded_headers(&request);
        let TunnelRequest { id, body, .. } = request;

        debug!(request_id = %id, %method, %url, "Forwarding to local service");

        let mut builder = self.client.request(method, url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }
        let response = builder.send().await?;

        let mut reply = TunnelReply::new(id, response.status().as_u16());
        for (name, value) in response.headers() {
            reply
                .headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }
        let body = response.bytes().await?;
        reply.body = String::from_utf8_lossy(&body).into_owned();

        Ok(reply)
    }
}

fn forwarded_headers(request: &TunnelRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in &request.headers {
        if SKIPPED_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(request_id = %request.id, header = %name, "Skipping invalid header name");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(header_name.clone(), value);
            }
        }
    }
    headers
}
