//! Mapping of tunnel failures onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use burrow_control::TunnelError;
use tracing::debug;

/// A tunneled request that produced no reply
///
/// Every variant is reported as `500` with a short plain-text reason.
#[derive(Debug)]
pub struct TunnelFailure(pub TunnelError);

impl From<TunnelError> for TunnelFailure {
    fn from(error: TunnelError) -> Self {
        Self(error)
    }
}

impl IntoResponse for TunnelFailure {
    fn into_response(self) -> Response {
        debug!(error = %self.0, "Tunneled request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}
