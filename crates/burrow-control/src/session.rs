//! Registry for the single active agent session
//!
//! At most one authenticated agent connection is installed at any time. A new
//! connection with a valid credential supersedes the current one (by default);
//! a connection with a bad credential is closed without touching it.
//!
//! During a takeover the new session is installed before the old one is
//! closed, so requests arriving meanwhile go to the new agent.
//!
//! Every session carries a lost signal. Requests sent over a session hold a
//! clone of it and are woken as soon as the session is deactivated or taken
//! over, instead of waiting for their own deadline.

use async_trait::async_trait;
use burrow_auth::CredentialVerifier;
use burrow_proto::{CONFLICT_NOTICE, SUPERSEDED_NOTICE, UNAUTHORIZED_NOTICE};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SendError, SinkError};

/// Upper bound for best-effort notices and close handshakes
const NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// Process-unique identifier of an agent connection
pub type ConnectionId = u64;

/// Write half of an agent connection
///
/// The registry is the only writer; all calls on one sink are serialized
/// behind the session's writer lock.
#[async_trait]
pub trait SessionSink: Send + 'static {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError>;

    async fn send_ping(&mut self) -> Result<(), SinkError>;

    async fn close(&mut self, reason: &str) -> Result<(), SinkError>;
}

/// What to do when a second authenticated agent connects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TakeoverPolicy {
    /// The newest authenticated connection wins
    #[default]
    Preempt,
    /// Keep the current session and refuse the newcomer
    KeepExisting,
}

/// Result of [`SessionRegistry::try_activate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Accepted {
        connection_id: ConnectionId,
    },
    Takeover {
        connection_id: ConnectionId,
        superseded: ConnectionId,
    },
    RejectedUnauthenticated,
    RejectedConflict,
}

impl Activation {
    /// Connection id of the newly installed session, if one was installed
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Activation::Accepted { connection_id } | Activation::Takeover { connection_id, .. } => {
                Some(*connection_id)
            }
            Activation::RejectedUnauthenticated | Activation::RejectedConflict => None,
        }
    }
}

/// Diagnostic snapshot of the active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    pub authenticated: bool,
}

/// Fires once the session a request was sent on is gone
#[derive(Debug, Clone)]
pub struct SessionLostSignal {
    token: CancellationToken,
}

impl SessionLostSignal {
    /// Resolves when the session is deactivated or superseded
    pub async fn lost(&self) {
        self.token.cancelled().await
    }

    pub fn is_lost(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Session {
    connection_id: ConnectionId,
    remote_addr: SocketAddr,
    connected_at: DateTime<Utc>,
    authenticated: bool,
    sink: Mutex<Box<dyn SessionSink>>,
    lost: CancellationToken,
}

impl Session {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            connection_id: self.connection_id,
            remote_addr: self.remote_addr,
            connected_at: self.connected_at,
            authenticated: self.authenticated,
        }
    }

    /// Best-effort: optionally tell the peer why, then close the connection
    async fn close(&self, notice: Option<&str>) {
        let connection_id = self.connection_id;
        let result = tokio::time::timeout(NOTICE_TIMEOUT, async {
            let mut sink = self.sink.lock().await;
            close_sink(sink.as_mut(), notice).await
        })
        .await;

        match result {
            Ok(Ok(())) => debug!(connection_id, "Closed agent connection"),
            Ok(Err(e)) => debug!(connection_id, error = %e, "Agent connection already gone"),
            Err(_) => warn!(connection_id, "Timed out closing agent connection"),
        }
    }
}

async fn close_sink(sink: &mut dyn SessionSink, notice: Option<&str>) -> Result<(), SinkError> {
    if let Some(notice) = notice {
        sink.send_text(notice.to_string()).await?;
    }
    sink.close(notice.unwrap_or("session closed")).await
}

/// Owns the single active agent session
pub struct SessionRegistry {
    verifier: Arc<dyn CredentialVerifier>,
    policy: TakeoverPolicy,
    active: RwLock<Option<Arc<Session>>>,
    /// Serializes activations so a takeover completes before the next one starts
    activation_gate: Mutex<()>,
    next_connection_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self::with_policy(verifier, TakeoverPolicy::default())
    }

    pub fn with_policy(verifier: Arc<dyn CredentialVerifier>, policy: TakeoverPolicy) -> Self {
        Self {
            verifier,
            policy,
            active: RwLock::new(None),
            activation_gate: Mutex::new(()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> TakeoverPolicy {
        self.policy
    }

    /// Check a credential without touching any session
    ///
    /// Verification is CPU bound and runs on the blocking pool.
    pub async fn verify(&self, credential: &str) -> bool {
        let verifier = self.verifier.clone();
        let candidate = credential.to_owned();
        match tokio::task::spawn_blocking(move || verifier.verify(&candidate)).await {
            Ok(authorized) => authorized,
            Err(e) => {
                error!(error = %e, "Credential verification task failed");
                false
            }
        }
    }

    /// Authenticate `sink` and install it as the active session
    ///
    /// A rejected connection is sent a notice and closed; the current session
    /// is left untouched.
    pub async fn try_activate(
        &self,
        mut sink: Box<dyn SessionSink>,
        credential: &str,
        remote_addr: SocketAddr,
    ) -> Activation {
        if !self.verify(credential).await {
            warn!(%remote_addr, "Refused agent connection: bad access token");
            let _ = tokio::time::timeout(
                NOTICE_TIMEOUT,
                close_sink(sink.as_mut(), Some(UNAUTHORIZED_NOTICE)),
            )
            .await;
            return Activation::RejectedUnauthenticated;
        }

        self.activate_verified(sink, remote_addr).await
    }

    /// Install a connection whose credential the caller has already verified
    ///
    /// Under [`TakeoverPolicy::Preempt`] the new session is installed first;
    /// the previous one then has its pending requests woken and is notified
    /// and closed.
    pub async fn activate_verified(
        &self,
        mut sink: Box<dyn SessionSink>,
        remote_addr: SocketAddr,
    ) -> Activation {
        let _gate = self.activation_gate.lock().await;

        // Only activations install sessions and they hold the gate
        if self.policy == TakeoverPolicy::KeepExisting && self.is_active() {
            warn!(%remote_addr, "Refused agent connection: a session is already active");
            let _ = tokio::time::timeout(
                NOTICE_TIMEOUT,
                close_sink(sink.as_mut(), Some(CONFLICT_NOTICE)),
            )
            .await;
            return Activation::RejectedConflict;
        }

        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            connection_id,
            remote_addr,
            connected_at: Utc::now(),
            authenticated: true,
            sink: Mutex::new(sink),
            lost: CancellationToken::new(),
        });

        let previous = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(session);
        info!(connection_id, %remote_addr, "Established agent session");

        let Some(old) = previous else {
            return Activation::Accepted { connection_id };
        };

        info!(
            connection_id = old.connection_id,
            remote_addr = %old.remote_addr,
            new_connection_id = connection_id,
            "Agent connection superseded by a new authenticated connection"
        );
        old.lost.cancel();
        old.close(Some(SUPERSEDED_NOTICE)).await;

        Activation::Takeover {
            connection_id,
            superseded: old.connection_id,
        }
    }

    /// Write one frame to the active session
    ///
    /// Returns the lost signal of the session the frame was written to. A
    /// failed write is treated as connection loss and tears the session down.
    pub async fn send(&self, frame: String) -> Result<SessionLostSignal, SendError> {
        let session = self.current().ok_or(SendError::NoActiveSession)?;

        let result = {
            let mut sink = session.sink.lock().await;
            sink.send_text(frame).await
        };

        match result {
            Ok(()) => Ok(SessionLostSignal {
                token: session.lost.clone(),
            }),
            Err(e) => {
                warn!(
                    connection_id = session.connection_id,
                    error = %e,
                    "Write to agent connection failed, dropping session"
                );
                self.deactivate(session.connection_id).await;
                Err(SendError::Transport(e.0))
            }
        }
    }

    /// Send a keepalive ping if `connection_id` is still the active session
    pub async fn ping(&self, connection_id: ConnectionId) -> Result<(), SendError> {
        let session = self
            .current()
            .filter(|s| s.connection_id == connection_id)
            .ok_or(SendError::NoActiveSession)?;

        let result = {
            let mut sink = session.sink.lock().await;
            sink.send_ping().await
        };

        if let Err(e) = result {
            warn!(connection_id, error = %e, "Keepalive ping failed, dropping session");
            self.deactivate(connection_id).await;
            return Err(SendError::Transport(e.0));
        }
        Ok(())
    }

    /// Clear the active session if it is still `connection_id`
    ///
    /// Returns false when the connection was already superseded or removed.
    pub async fn deactivate(&self, connection_id: ConnectionId) -> bool {
        let removed = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            let is_current = active
                .as_ref()
                .is_some_and(|session| session.connection_id == connection_id);
            if is_current {
                active.take()
            } else {
                None
            }
        };

        match removed {
            Some(session) => {
                session.lost.cancel();
                info!(
                    connection_id,
                    remote_addr = %session.remote_addr,
                    "Agent session ended"
                );
                session.close(None).await;
                true
            }
            None => {
                debug!(connection_id, "Ignoring deactivate for inactive connection");
                false
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn status(&self) -> Option<SessionInfo> {
        self.current().map(|session| session.info())
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("policy", &self.policy)
            .field("active", &self.status())
            .finish()
    }
}
