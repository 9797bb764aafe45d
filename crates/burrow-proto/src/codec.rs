//! JSON text-frame codec
//!
//! Every frame on the tunnel connection is a single JSON document. Decoding
//! rejects frames without a correlation id, since such a frame can never be
//! matched to a waiting request.

use crate::messages::{TunnelReply, TunnelRequest};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame has no correlation id")]
    MissingId,
}

pub fn encode_request(request: &TunnelRequest) -> Result<String, CodecError> {
    Ok(serde_json::to_string(request)?)
}

pub fn encode_reply(reply: &TunnelReply) -> Result<String, CodecError> {
    Ok(serde_json::to_string(reply)?)
}

pub fn decode_request(frame: &[u8]) -> Result<TunnelRequest, CodecError> {
    let request: TunnelRequest = serde_json::from_slice(frame)?;
    if request.id.is_empty() {
        return Err(CodecError::MissingId);
    }
    Ok(request)
}

pub fn decode_reply(frame: &[u8]) -> Result<TunnelReply, CodecError> {
    let reply: TunnelReply = serde_json::from_slice(frame)?;
    if reply.id.is_empty() {
        return Err(CodecError::MissingId);
    }
    Ok(reply)
}
