//! Connection loop towards the relay

use burrow_proto::{decode_request, encode_reply, SUPERSEDED_NOTICE, UNAUTHORIZED_NOTICE};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{http::StatusCode, Error as WsError, Message},
};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::forwarder::LocalForwarder;
use crate::reconnect::ReconnectManager;

/// How an established session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Closed or dropped; worth reconnecting
    Closed,
    /// Another agent took over the tunnel
    Superseded,
    /// The relay refused the token after upgrading
    Unauthorized,
}

pub struct Agent {
    config: AgentConfig,
    forwarder: Arc<LocalForwarder>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        // Fail on a malformed relay URL before the first connection attempt
        config.connect_url()?;
        let forwarder = LocalForwarder::new(&config.local_url, config.local_timeout)?;

        Ok(Self {
            config,
            forwarder: Arc::new(forwarder),
        })
    }

    /// Stay connected to the relay, reconnecting with backoff
    ///
    /// Returns when the token is refused, when another agent takes over or
    /// when the reconnection budget is exhausted.
    pub async fn run(&self) -> Result<(), AgentError> {
        let url = self.config.connect_url()?;
        let mut reconnect = ReconnectManager::new(self.config.reconnect.clone());

        loop {
            match self.run_session(&url).await {
                Ok(SessionEnd::Closed) => {
                    info!("Relay connection closed, reconnecting");
                    reconnect.reset();
                }
                Ok(SessionEnd::Superseded) => {
                    warn!("Another agent took over the tunnel, stopping");
                    return Err(AgentError::Superseded);
                }
                Ok(SessionEnd::Unauthorized) | Err(AgentError::Unauthorized) => {
                    error!("Relay rejected the access token");
                    return Err(AgentError::Unauthorized);
                }
                Err(e) => {
                    warn!(error = %e, attempt = reconnect.attempt() + 1, "Could not reach relay");
                }
            }

            reconnect.wait().await?;
        }
    }

    async fn run_session(&self, url: &Url) -> Result<SessionEnd, AgentError> {
        let (socket, _response) = match connect_async(url.as_str()).await {
            Ok(connected) => connected,
            Err(WsError::Http(response)) if response.status() == StatusCode::UNAUTHORIZED => {
                return Err(AgentError::Unauthorized)
            }
            Err(e) => return Err(AgentError::Connect(e.to_string())),
        };
        info!(
            relay = %self.config.relay_url,
            local = %self.config.local_url,
            "Connected to relay"
        );

        let (mut sink, mut stream) = socket.split();

        // Replies from concurrent request tasks funnel through one writer
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!(error = %e, "Relay connection write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut inflight = JoinSet::new();
        let end = loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = notice(&text) {
                            break end;
                        }
                        self.spawn_request(&mut inflight, text.as_bytes(), &out_tx);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        self.spawn_request(&mut inflight, &data, &out_tx);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Relay closed the connection");
                        break SessionEnd::Closed;
                    }
                    Some(Ok(_)) => trace!("Relay keepalive"),
                    Some(Err(e)) => {
                        warn!(error = %e, "Relay connection read failed");
                        break SessionEnd::Closed;
                    }
                    None => break SessionEnd::Closed,
                },
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Request task failed");
                    }
                }
            }
        };

        inflight.shutdown().await;
        drop(out_tx);
        let _ = writer.await;

        Ok(end)
    }

    fn spawn_request(
        &self,
        inflight: &mut JoinSet<()>,
        frame: &[u8],
        out_tx: &mpsc::UnboundedSender<Message>,
    ) {
        let request = match decode_request(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Ignoring unexpected frame from relay");
                return;
            }
        };

        let forwarder = self.forwarder.clone();
        let out_tx = out_tx.clone();
        inflight.spawn(async move {
            let reply = forwarder.forward(request).await;
            match encode_reply(&reply) {
                Ok(frame) => {
                    if out_tx.send(Message::Text(frame)).is_err() {
                        debug!(request_id = %reply.id, "Relay connection gone before reply was sent");
                    }
                }
                Err(e) => error!(request_id = %reply.id, error = %e, "Could not encode reply"),
            }
        });
    }
}

/// Plain-text notices the relay sends before closing a connection
fn notice(text: &str) -> Option<SessionEnd> {
    match text {
        SUPERSEDED_NOTICE => Some(SessionEnd::Superseded),
        UNAUTHORIZED_NOTICE => Some(SessionEnd::Unauthorized),
        _ => None,
    }
}
