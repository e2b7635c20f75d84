//! Heartbeat backend contract and the two bundled backends.
//!
//! Every frame from an authenticated sender counts as a heartbeat; the
//! dispatch engine notifies the backend on each one. Strategies beyond
//! that are the backend's business.

use crate::scheduler::{ScheduleHandle, Scheduler};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use palaver_types::{PeerId, RoutingId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Pluggable liveness strategy.
pub trait HeartbeatBackend: Send + Sync {
    /// One-time setup at peer start.
    fn configure(&self) {}

    /// A frame arrived from this identity.
    fn handle_heartbeat(&self, identity: &PeerId, routing_id: Option<&RoutingId>);

    /// One-time teardown at peer stop.
    fn stop(&self) {}
}

/// Does nothing. The implicit every-frame-is-a-heartbeat rule still holds;
/// this backend just declines to track it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHeartbeat;

impl HeartbeatBackend for NoopHeartbeat {
    fn handle_heartbeat(&self, _identity: &PeerId, _routing_id: Option<&RoutingId>) {}
}

/// Tracks last-seen times and periodically sweeps for silent peers.
///
/// Peers silent for longer than the liveness window are logged and
/// forgotten; they re-enter the table on their next frame.
pub struct WatchdogHeartbeat {
    window: Duration,
    scheduler: Arc<dyn Scheduler>,
    last_seen: Arc<DashMap<PeerId, DateTime<Utc>>>,
    sweep_guard: Mutex<Option<ScheduleHandle>>,
}

impl WatchdogHeartbeat {
    pub fn new(window: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            window,
            scheduler,
            last_seen: Arc::new(DashMap::new()),
            sweep_guard: Mutex::new(None),
        }
    }

    /// Identities currently considered alive.
    pub fn tracked(&self) -> Vec<PeerId> {
        self.last_seen.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop and report every peer whose last frame is older than the
    /// liveness window. Called from the periodic schedule; public so the
    /// sweep is testable without a timer.
    pub fn sweep(last_seen: &DashMap<PeerId, DateTime<Utc>>, window: Duration) -> Vec<PeerId> {
        let horizon = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let overdue: Vec<PeerId> = last_seen
            .iter()
            .filter(|entry| *entry.value() < horizon)
            .map(|entry| entry.key().clone())
            .collect();
        for peer in &overdue {
            warn!(%peer, "peer missed its liveness window");
            last_seen.remove(peer);
        }
        overdue
    }
}

impl HeartbeatBackend for WatchdogHeartbeat {
    fn configure(&self) {
        let last_seen = Arc::clone(&self.last_seen);
        let window = self.window;
        match self.scheduler.schedule_periodic(
            window,
            Box::new(move || {
                WatchdogHeartbeat::sweep(&last_seen, window);
            }),
        ) {
            Ok(guard) => {
                *self
                    .sweep_guard
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(guard);
            }
            // Synchronous mode has no timers; the watchdog degrades to a
            // passive last-seen table.
            Err(e) => warn!("heartbeat sweep not scheduled: {e}"),
        }
    }

    fn handle_heartbeat(&self, identity: &PeerId, _routing_id: Option<&RoutingId>) {
        debug!(peer = %identity, "heartbeat");
        self.last_seen.insert(identity.clone(), Utc::now());
    }

    fn stop(&self) {
        if let Some(guard) = self
            .sweep_guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            guard.cancel();
        }
    }
}
