//! Request/response correlation with per-request deadlines.
//!
//! One [`Correlator`] is attached to each connection that has requests in
//! flight. Registration creates a write-once result slot; resolution takes
//! the slot out of the table and fires it, so a request can reach exactly one
//! terminal outcome: resolved, failed, or timed out. Late or unknown
//! resolutions are no-ops with a warning, never errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use prism_core::RelayError;

/// Terminal outcome of a relayed command.
pub type CommandResult = Result<Value, RelayError>;

/// Per-connection table of outstanding requests.
///
/// All locking is internal; callers never hold a lock across an await point
/// because the critical sections only move a oneshot sender in or out of the
/// map.
#[derive(Debug)]
pub struct Correlator {
    pending: Mutex<HashMap<String, oneshot::Sender<CommandResult>>>,
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Track a new request and arm its deadline.
    ///
    /// Fails with [`RelayError::DuplicateRequestId`] if the id is already in
    /// flight on this connection.
    pub fn register(
        self: &Arc<Self>,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Waiter, RelayError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(request_id) {
                return Err(RelayError::DuplicateRequestId {
                    request_id: request_id.to_owned(),
                });
            }
            let _ = pending.insert(request_id.to_owned(), tx);
        }
        Ok(Waiter {
            request_id: request_id.to_owned(),
            rx,
            timeout,
            correlator: Arc::clone(self),
        })
    }

    /// Resolve an outstanding request with its terminal outcome.
    ///
    /// Unknown ids (already resolved, timed out, or never registered) are
    /// dropped with a warning; a late resolution must never surface as an
    /// error to whoever delivered it.
    pub fn resolve(&self, request_id: &str, outcome: CommandResult) {
        let slot = self.pending.lock().remove(request_id);
        match slot {
            Some(tx) => {
                // The waiter may have been cancelled between removal and send;
                // that also counts as a no-op.
                let _ = tx.send(outcome);
            }
            None => {
                warn!(request_id, "dropping response for unknown request id");
            }
        }
    }

    /// Fail every outstanding request at once.
    ///
    /// Used when the connection the requests were routed over drops.
    pub fn fail_all(&self, error: &RelayError) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            warn!(
                count = drained.len(),
                kind = error.kind(),
                "failing all pending requests"
            );
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Number of requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    fn remove(&self, request_id: &str) {
        let _ = self.pending.lock().remove(request_id);
    }
}

/// Handle on one registered request.
///
/// Dropping the waiter without awaiting it cancels the request locally: the
/// correlator entry is removed and a late response hits the unknown-id path.
#[derive(Debug)]
pub struct Waiter {
    request_id: String,
    rx: oneshot::Receiver<CommandResult>,
    timeout: Duration,
    correlator: Arc<Correlator>,
}

impl Waiter {
    /// The id this waiter is registered under.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Suspend until the request resolves or its deadline elapses.
    ///
    /// On deadline elapse the outcome is synthesized as
    /// [`RelayError::Timeout`] and the table entry removed, so a response
    /// arriving afterwards is dropped by `resolve`.
    pub async fn wait(mut self) -> CommandResult {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => {
                // Sender dropped without firing: the correlator was torn down.
                Err(RelayError::TransportDropped {
                    reason: "correlator closed".into(),
                })
            }
            Err(_elapsed) => {
                self.correlator.remove(&self.request_id);
                Err(RelayError::Timeout)
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        // No-op when the entry was already taken by resolve/timeout.
        self.correlator.remove(&self.request_id);
    }
}
