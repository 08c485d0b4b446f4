//! Correlates outbound JSON-RPC requests with their eventual response.
//!
//! Mirrors the open-sessions bookkeeping pattern from the teacher crate, but
//! keyed by a monotonically increasing request id rather than a session uuid,
//! and backed by a oneshot reply slot per in-flight request instead of a
//! bare presence set.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::jsonrpc::JsonRpcResponse;

/// What became of a tracked request.
#[derive(Debug)]
pub enum RequestOutcome {
    /// The server replied with a `result` payload.
    Success(serde_json::Value),
    /// The server replied with an `error` object.
    Error {
        /// Server-defined error code.
        code: i64,
        /// Human-readable message.
        message: String,
    },
}

impl From<JsonRpcResponse> for RequestOutcome {
    fn from(resp: JsonRpcResponse) -> Self {
        match resp.error {
            Some(err) => RequestOutcome::Error {
                code: err.code,
                message: err.message,
            },
            None => RequestOutcome::Success(resp.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

struct Pending {
    reply: oneshot::Sender<RequestOutcome>,
}

/// Tracks in-flight requests by request id.
///
/// A single [`crate::engine`] event loop owns this; the `Mutex` exists only
/// because the public registration handle is cloned into the caller-facing
/// future without borrowing the engine across an await point.
pub struct RequestTracker {
    next_id: Mutex<i64>,
    pending: Mutex<HashMap<i64, Pending>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    /// Builds an empty tracker. Ids start at 1; JSON-RPC permits any
    /// non-null id but `0` reads poorly in logs next to "no id".
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates the next request id and registers a reply slot for it.
    /// Returns the id to stamp on the outbound envelope and a future that
    /// resolves once [`RequestTracker::complete`] or
    /// [`RequestTracker::expire`] is called for that id.
    pub fn register(&self) -> (i64, oneshot::Receiver<RequestOutcome>) {
        let id = {
            let mut next_id = self.next_id.lock();
            let id = *next_id;
            *next_id += 1;
            id
        };
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, Pending { reply: tx });
        (id, rx)
    }

    /// Delivers a correlated response. Silently drops responses with no
    /// matching pending id — stale correlation is logged by the caller.
    pub fn complete(&self, id: i64, outcome: RequestOutcome) -> bool {
        if let Some(pending) = self.pending.lock().remove(&id) {
            let _ = pending.reply.send(outcome);
            true
        } else {
            false
        }
    }

    /// Removes and drops a single pending request without resolving it.
    /// Used when a request never reaches the wire (rejected by the rate
    /// limiter, or the send itself failed) so its slot doesn't linger.
    pub fn expire(&self, id: i64) {
        self.pending.lock().remove(&id);
    }

    /// Drains every pending request, failing each with [`crate::Error::ConnectionLost`].
    /// Called when the engine tears down the transport — per design,
    /// in-flight requests never survive a reconnection silently.
    pub fn drain(&self) {
        for (_, pending) in self.pending.lock().drain() {
            drop(pending.reply);
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// `true` when no requests are in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_complete_resolves_waiter() {
        let tracker = RequestTracker::new();
        let (id, rx) = tracker.register();
        assert!(tracker.complete(id, RequestOutcome::Success(serde_json::json!({"ok": true}))));
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, RequestOutcome::Success(_)));
    }

    #[tokio::test]
    async fn drain_drops_all_waiters_without_reply() {
        let tracker = RequestTracker::new();
        let (_, rx1) = tracker.register();
        let (_, rx2) = tracker.register();
        assert_eq!(tracker.len(), 2);
        tracker.drain();
        assert!(tracker.is_empty());
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[test]
    fn ids_are_monotonically_increasing() {
        let tracker = RequestTracker::new();
        let (id1, _) = tracker.register();
        let (id2, _) = tracker.register();
        assert!(id2 > id1);
    }

    #[test]
    fn complete_on_unknown_id_is_a_noop() {
        let tracker = RequestTracker::new();
        assert!(!tracker.complete(999, RequestOutcome::Success(serde_json::Value::Null)));
    }

    #[test]
    fn expire_drops_waiter_without_resolving() {
        let tracker = RequestTracker::new();
        let (id, rx) = tracker.register();
        tracker.expire(id);
        assert!(rx.try_recv().is_err());
        assert!(tracker.is_empty());
    }
}
