//! Request correlator
//!
//! Assigns each tunneled request a correlation id, sends it over the active
//! session and parks the caller until the matching reply, the deadline or the
//! loss of the session, whichever comes first.

use burrow_proto::{encode_request, TunnelReply, TunnelRequest, DEFAULT_REQUEST_TIMEOUT_SECS};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SendError, TunnelError};
use crate::session::SessionRegistry;

struct PendingRequest {
    submitted_at: Instant,
    reply_tx: oneshot::Sender<TunnelReply>,
}

/// Removes the pending entry however the waiting caller exits
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingRequest>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.id).is_some() {
            debug!(request_id = %self.id, "Dropped pending request");
        }
    }
}

/// Tracks tunneled requests awaiting a reply from the agent
#[derive(Clone)]
pub struct RequestCorrelator {
    registry: Arc<SessionRegistry>,
    pending: Arc<DashMap<String, PendingRequest>>,
    timeout: Duration,
}

impl RequestCorrelator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_timeout(registry, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(registry: Arc<SessionRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            pending: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Forward `request` to the agent and wait for its reply
    ///
    /// The caller-supplied id is replaced by a freshly generated one. Fails
    /// with [`TunnelError::NoActiveSession`] without waiting when no agent is
    /// attached. Dropping the returned future withdraws the request.
    pub async fn submit(&self, mut request: TunnelRequest) -> Result<TunnelReply, TunnelError> {
        if !self.registry.is_active() {
            return Err(TunnelError::NoActiveSession);
        }

        let deadline = Instant::now() + self.timeout;
        let (reply_tx, reply_rx) = oneshot::channel();
        let id = self.register(reply_tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };

        request.id = id;
        let frame = encode_request(&request)?;

        let lost = match self.registry.send(frame).await {
            Ok(lost) => lost,
            Err(SendError::NoActiveSession) => return Err(TunnelError::NoActiveSession),
            Err(SendError::Transport(_)) => return Err(TunnelError::SessionLost),
        };
        debug!(
            request_id = %request.id,
            method = %request.method,
            route = %request.targeted_route,
            "Forwarded request to agent"
        );

        tokio::select! {
            biased;
            reply = reply_rx => reply.map_err(|_| TunnelError::SessionLost),
            _ = lost.lost() => {
                debug!(request_id = %request.id, "Agent session lost while request was pending");
                Err(TunnelError::SessionLost)
            }
            _ = tokio::time::sleep_until(deadline) => {
                warn!(
                    request_id = %request.id,
                    timeout_secs = self.timeout.as_secs(),
                    "No reply from agent before deadline"
                );
                Err(TunnelError::RequestTimeout(self.timeout))
            }
        }
    }

    /// Hand a reply to the caller waiting on its id
    ///
    /// Returns false when nobody is waiting, e.g. for late or duplicate replies.
    pub fn resolve(&self, reply: TunnelReply) -> bool {
        let Some((id, pending)) = self.pending.remove(&reply.id) else {
            warn!(request_id = %reply.id, "Discarding reply for unknown or expired request");
            return false;
        };

        let waited = pending.submitted_at.elapsed();
        if pending.reply_tx.send(reply).is_err() {
            debug!(request_id = %id, "Caller went away before the reply arrived");
            return false;
        }
        debug!(request_id = %id, waited_ms = waited.as_millis() as u64, "Routed reply");
        true
    }

    /// Number of requests currently awaiting a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn register(&self, reply_tx: oneshot::Sender<TunnelReply>) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.pending.entry(id.clone()) {
                slot.insert(PendingRequest {
                    submitted_at: Instant::now(),
                    reply_tx,
                });
                return id;
            }
        }
    }
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TakeoverPolicy;
    use crate::test_support::{activate, addr, next_request, registry};

    #[tokio::test]
    async fn test_submit_without_session_fails_fast() {
        let correlator = RequestCorrelator::new(registry(TakeoverPolicy::Preempt));

        let started = std::time::Instant::now();
        let result = correlator.submit(TunnelRequest::new("GET", "/")).await;

        assert!(matches!(result, Err(TunnelError::NoActiveSession)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_and_resolve() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (_id, mut events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry);

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move {
                correlator
                    .submit(TunnelRequest::new("GET", "/orders/42").with_param("page", "1"))
                    .await
            })
        };

        let request = next_request(&mut events).await;
        assert_eq!(request.method, "GET");
        assert_eq!(request.targeted_route, "/orders/42");
        assert_eq!(request.params["page"], vec!["1".to_string()]);
        assert!(!request.id.is_empty());
        assert_eq!(correlator.pending_count(), 1);

        assert!(correlator.resolve(TunnelReply::new(request.id.clone(), 200).with_body("{}")));

        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply.status_code, 200);
        assert_eq!(reply.body, "{}");
        assert_eq!(reply.id, request.id);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_caller_supplied_id_is_replaced() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (_id, mut events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry);

        let mut request = TunnelRequest::new("GET", "/");
        request.id = "chosen-by-caller".to_string();
        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.submit(request).await })
        };

        let sent = next_request(&mut events).await;
        assert_ne!(sent.id, "chosen-by-caller");
        assert!(!correlator.resolve(TunnelReply::new("chosen-by-caller", 200)));
        assert!(correlator.resolve(TunnelReply::new(sent.id, 204)));
        assert_eq!(waiter.await.unwrap().unwrap().status_code, 204);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_times_out() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (_id, _events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry);

        let started = Instant::now();
        let result = correlator.submit(TunnelRequest::new("GET", "/slow")).await;

        match result {
            Err(TunnelError::RequestTimeout(timeout)) => {
                assert_eq!(timeout, Duration::from_secs(60))
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_session_loss_wakes_pending_request() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (connection_id, mut events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry.clone());

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.submit(TunnelRequest::new("GET", "/")).await })
        };
        next_request(&mut events).await;

        registry.deactivate(connection_id).await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("request should fail promptly")
            .unwrap();
        assert!(matches!(result, Err(TunnelError::SessionLost)));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_caller_leaves_no_entry() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (_id, mut events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry);

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.submit(TunnelRequest::new("GET", "/")).await })
        };
        let request = next_request(&mut events).await;
        assert_eq!(correlator.pending_count(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        assert_eq!(correlator.pending_count(), 0);
        assert!(!correlator.resolve(TunnelReply::new(request.id, 200)));
    }

    #[tokio::test]
    async fn test_duplicate_reply_is_discarded() {
        let registry = registry(TakeoverPolicy::Preempt);
        let (_id, mut events, _) = activate(&registry, addr(5000)).await;
        let correlator = RequestCorrelator::new(registry);

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.submit(TunnelRequest::new("GET", "/")).await })
        };
        let request = next_request(&mut events).await;

        assert!(correlator.resolve(TunnelReply::new(request.id.clone(), 200).with_body("first")));
        assert!(!correlator.resolve(TunnelReply::new(request.id, 500).with_body("second")));

        let reply = waiter.await.unwrap().unwrap();
        assert_eq!(reply.body, "first");
    }

    #[test]
    fn test_resolve_unknown_id() {
        let correlator = RequestCorrelator::new(registry(TakeoverPolicy::Preempt));
        assert!(!correlator.resolve(TunnelReply::new("nobody-waits", 200)));
    }
}
