//! Agent side of the relay: WebSocket sink, frame mapping and keepalive

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use burrow_control::{ConnectionId, InboundFrame, SessionRegistry, SessionSink, SinkError};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::RelayState;

/// Write half of an upgraded agent connection
pub struct WsSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl SessionSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(SinkError::new)
    }

    async fn send_ping(&mut self) -> Result<(), SinkError> {
        self.0
            .send(Message::Ping(Bytes::new()))
            .await
            .map_err(SinkError::new)
    }

    async fn close(&mut self, reason: &str) -> Result<(), SinkError> {
        self.0
            .send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: reason.into(),
            })))
            .await
            .map_err(SinkError::new)?;
        self.0.close().await.map_err(SinkError::new)
    }
}

fn inbound_frame(message: Message) -> InboundFrame {
    match message {
        Message::Text(text) => InboundFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => InboundFrame::Binary(data.to_vec()),
        Message::Ping(_) => InboundFrame::Ping,
        Message::Pong(_) => InboundFrame::Pong,
        Message::Close(frame) => InboundFrame::Close(frame.map(|f| f.reason.as_str().to_owned())),
    }
}

/// Register an upgraded connection and run its read loop until it ends
///
/// The token was already checked before the upgrade was accepted.
pub(crate) async fn serve_agent(socket: WebSocket, state: Arc<RelayState>, remote_addr: SocketAddr) {
    let (sink, stream) = socket.split();

    let activation = state
        .registry
        .activate_verified(Box::new(WsSink(sink)), remote_addr)
        .await;
    let Some(connection_id) = activation.connection_id() else {
        debug!(%remote_addr, ?activation, "Agent connection not activated");
        return;
    };

    let keepalive = state
        .config
        .keepalive_interval
        .map(|every| spawn_keepalive(state.registry.clone(), connection_id, every));

    let frames = stream.map(|message| message.map(inbound_frame));
    let end = state.dispatcher.run(connection_id, frames).await;
    debug!(connection_id, ?end, "Agent read loop finished");

    if let Some(keepalive) = keepalive {
        keepalive.abort();
    }
}

fn spawn_keepalive(
    registry: Arc<SessionRegistry>,
    connection_id: ConnectionId,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if registry.ping(connection_id).await.is_err() {
                break;
            }
            trace!(connection_id, "Sent keepalive ping");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_frame_mapping() {
        assert_eq!(
            inbound_frame(Message::Text("{}".into())),
            InboundFrame::Text("{}".to_string())
        );
        assert_eq!(
            inbound_frame(Message::Binary(Bytes::from_static(b"raw"))),
            InboundFrame::Binary(b"raw".to_vec())
        );
        assert_eq!(inbound_frame(Message::Pong(Bytes::new())), InboundFrame::Pong);
        assert_eq!(
            inbound_frame(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "bye".into(),
            }))),
            InboundFrame::Close(Some("bye".to_string()))
        );
        assert_eq!(inbound_frame(Message::Close(None)), InboundFrame::Close(None));
    }
}
