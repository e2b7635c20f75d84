//! Deferred and periodic task scheduling.
//!
//! The dispatch engine never talks to a timer API directly; it schedules
//! through this capability so the same core runs under a reactor or in
//! synchronous mode. The synchronous implementation refuses: there is no
//! loop to run deferred work on.

use palaver_types::PalaverError;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::trace;

/// A one-shot task run after a delay.
pub type OneShotTask = Box<dyn FnOnce() + Send + 'static>;

/// A task run on every tick of a periodic schedule.
pub type PeriodicTask = Box<dyn Fn() + Send + Sync + 'static>;

/// Cancellation handle for a scheduled task.
#[derive(Debug)]
pub struct ScheduleHandle(AbortHandle);

impl ScheduleHandle {
    /// Cancel the task if it has not run yet. Idempotent.
    pub fn cancel(&self) {
        self.0.abort();
    }
}

/// Timer capability consumed by the engine and the heartbeat backends.
pub trait Scheduler: Send + Sync {
    /// Run `task` once, `delay` from now.
    fn schedule_later(
        &self,
        delay: Duration,
        task: OneShotTask,
    ) -> Result<ScheduleHandle, PalaverError>;

    /// Run `task` every `interval`, starting one interval from now.
    fn schedule_periodic(
        &self,
        interval: Duration,
        task: PeriodicTask,
    ) -> Result<ScheduleHandle, PalaverError>;
}

/// Reactor-mode scheduler: cancellable tasks spawned on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_later(
        &self,
        delay: Duration,
        task: OneShotTask,
    ) -> Result<ScheduleHandle, PalaverError> {
        trace!(?delay, "scheduling one-shot task");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
        Ok(ScheduleHandle(handle.abort_handle()))
    }

    fn schedule_periodic(
        &self,
        interval: Duration,
        task: PeriodicTask,
    ) -> Result<ScheduleHandle, PalaverError> {
        trace!(?interval, "scheduling periodic task");
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                task();
            }
        });
        Ok(ScheduleHandle(handle.abort_handle()))
    }
}

/// Synchronous-mode scheduler: every request fails fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncScheduler;

impl Scheduler for SyncScheduler {
    fn schedule_later(
        &self,
        _delay: Duration,
        _task: OneShotTask,
    ) -> Result<ScheduleHandle, PalaverError> {
        Err(PalaverError::NotSupported(
            "schedule_later requires reactor mode".into(),
        ))
    }

    fn schedule_periodic(
        &self,
        _interval: Duration,
        _task: PeriodicTask,
    ) -> Result<ScheduleHandle, PalaverError> {
        Err(PalaverError::NotSupported(
            "schedule_periodic requires reactor mode".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_schedule_later_runs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        TokioScheduler
            .schedule_later(
                Duration::from_millis(10),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_does_not_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = TokioScheduler
            .schedule_later(
                Duration::from_millis(30),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_periodic_ticks_until_cancelled() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let handle = TokioScheduler
            .schedule_periodic(
                Duration::from_millis(10),
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(55)).await;
        handle.cancel();
        let ticks = counter.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected a few ticks, got {ticks}");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), ticks);
    }

    #[test]
    fn test_sync_scheduler_refuses() {
        assert!(matches!(
            SyncScheduler.schedule_later(Duration::from_secs(1), Box::new(|| {})),
            Err(PalaverError::NotSupported(_))
        ));
        assert!(matches!(
            SyncScheduler.schedule_periodic(Duration::from_secs(1), Box::new(|| {})),
            Err(PalaverError::NotSupported(_))
        ));
    }
}
