//! In-flight outbound calls, keyed by correlation id.
//!
//! Resolve, reject and expire race each other by design: a response can
//! arrive in the same instant the timeout fires. Whichever pops the entry
//! from the map first wins; the loser observes absence and does nothing.
//! `DashMap::remove` gives that pop atomically, and the oneshot sender can
//! only ever fire once, so duplicate resolution is impossible.

use crate::scheduler::ScheduleHandle;
use dashmap::DashMap;
use palaver_types::{CallId, PalaverError};
use palaver_wire::Value;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Outcome delivered to a waiting caller.
pub type CallResult = Result<Value, PalaverError>;

/// Receiving end handed back to the caller of an outbound WORK.
pub type CallReceiver = oneshot::Receiver<CallResult>;

struct PendingCall {
    tx: oneshot::Sender<CallResult>,
    created_at: Instant,
    timeout_guard: Option<ScheduleHandle>,
}

impl PendingCall {
    fn finish(self, result: CallResult) {
        if let Some(guard) = &self.timeout_guard {
            guard.cancel();
        }
        // The receiver may already be gone (caller dropped the future).
        let _ = self.tx.send(result);
    }
}

/// Registry of every call this peer has sent and not yet heard back on.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<CallId, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new pending call. Correlation ids are never reused while
    /// live, so a collision here is a bug worth shouting about.
    pub fn register(
        &self,
        id: CallId,
        tx: oneshot::Sender<CallResult>,
        timeout_guard: Option<ScheduleHandle>,
    ) {
        let call = PendingCall {
            tx,
            created_at: Instant::now(),
            timeout_guard,
        };
        if self.calls.insert(id, call).is_some() {
            error!(%id, "correlation id collision: replaced a live pending call");
        }
    }

    /// Fulfil the call with a received result.
    pub fn resolve(&self, id: CallId, value: Value) {
        match self.calls.remove(&id) {
            Some((_, call)) => call.finish(Ok(value)),
            // Already timed out or never ours; the response is stale.
            None => debug!(%id, "no pending call for OK, dropping result"),
        }
    }

    /// Fail the call with a received or local error.
    pub fn reject(&self, id: CallId, error: PalaverError) {
        match self.calls.remove(&id) {
            Some((_, call)) => call.finish(Err(error)),
            None => warn!(%id, %error, "no pending call for ERROR, dropping"),
        }
    }

    /// Timeout path. A no-op when the call already resolved.
    pub fn expire(&self, id: CallId) {
        if let Some((_, call)) = self.calls.remove(&id) {
            let waited = call.created_at.elapsed();
            warn!(%id, ?waited, "call expired without a response");
            call.finish(Err(PalaverError::Timeout));
        }
    }

    /// Drop a registration without signalling the caller (send failed and
    /// the error is being returned on the spot).
    pub fn discard(&self, id: CallId) {
        if let Some((_, call)) = self.calls.remove(&id) {
            if let Some(guard) = &call.timeout_guard {
                guard.cancel();
            }
        }
    }

    /// Fail every outstanding call. Used at shutdown so no caller is left
    /// waiting forever.
    pub fn reject_all(&self, error: impl Fn() -> PalaverError) {
        let ids: Vec<CallId> = self.calls.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, call)) = self.calls.remove(&id) {
                call.finish(Err(error()));
            }
        }
    }

    pub fn live(&self) -> usize {
        self.calls.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn register_one(pending: &PendingCalls) -> (CallId, CallReceiver) {
        let id = CallId::fresh();
        let (tx, rx) = oneshot::channel();
        pending.register(id, tx, None);
        (id, rx)
    }

    #[test]
    fn test_resolve_delivers_value() {
        let pending = PendingCalls::new();
        let (id, mut rx) = register_one(&pending);

        pending.resolve(id, json!("HELLO"));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!("HELLO"));
        assert_eq!(pending.live(), 0);
    }

    #[test]
    fn test_reject_delivers_error() {
        let pending = PendingCalls::new();
        let (id, mut rx) = register_one(&pending);

        pending.reject(id, PalaverError::ServiceNotFound("a.b".into()));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(PalaverError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_expire_delivers_timeout_once() {
        let pending = PendingCalls::new();
        let (id, mut rx) = register_one(&pending);

        pending.expire(id);
        assert!(matches!(rx.try_recv().unwrap(), Err(PalaverError::Timeout)));

        // A late response after expiry is dropped, not delivered twice.
        pending.resolve(id, json!("late"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_resolve_wins_over_late_expire() {
        let pending = PendingCalls::new();
        let (id, mut rx) = register_one(&pending);

        pending.resolve(id, json!(1));
        pending.expire(id);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn test_stale_ids_are_noops() {
        let pending = PendingCalls::new();
        let ghost = CallId::fresh();
        pending.resolve(ghost, json!(0));
        pending.reject(ghost, PalaverError::Timeout);
        pending.expire(ghost);
        assert_eq!(pending.live(), 0);
    }

    #[test]
    fn test_reject_all_drains() {
        let pending = PendingCalls::new();
        let (_, mut rx1) = register_one(&pending);
        let (_, mut rx2) = register_one(&pending);
        assert_eq!(pending.live(), 2);

        pending.reject_all(|| PalaverError::Shutdown);
        assert_eq!(pending.live(), 0);
        assert!(matches!(rx1.try_recv().unwrap(), Err(PalaverError::Shutdown)));
        assert!(matches!(rx2.try_recv().unwrap(), Err(PalaverError::Shutdown)));
    }

    #[test]
    fn test_discard_is_silent() {
        let pending = PendingCalls::new();
        let (id, mut rx) = register_one(&pending);
        pending.discard(id);
        // Sender dropped without a value.
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
