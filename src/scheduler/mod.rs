//! Scheduler that probes every target on a fixed interval.

use crate::history::HistoryRecord;
use crate::probe::{DiagnosticError, ProbeOutcome, ProbeRunner, Target};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`MonitorScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
    Cancelled,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Cancelled,
        }
    }
}

/// Periodically fans out one probe per target and reports a record per tick.
///
/// Runs once: `Idle -> Running -> Cancelled`. Cancellation is observed between
/// ticks; a tick that has started always completes.
pub struct MonitorScheduler {
    runner: Arc<dyn ProbeRunner>,
    probe_timeout: Duration,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl MonitorScheduler {
    pub fn new(runner: Arc<dyn ProbeRunner>, probe_timeout: Duration) -> Self {
        Self {
            runner,
            probe_timeout,
            state: AtomicU8::new(SchedulerState::Idle as u8),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Token that stops the run loop when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop scheduling new ticks.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Probe `targets` every `interval` until cancelled, calling `on_tick` with
    /// each tick's record.
    ///
    /// Ticks are scheduled from the previous tick's start. Fails without
    /// running when the probe timeout is not shorter than the interval or
    /// the scheduler has already been started.
    pub async fn run<F>(
        &self,
        targets: Vec<Target>,
        interval: Duration,
        mut on_tick: F,
    ) -> Result<(), DiagnosticError>
    where
        F: FnMut(HistoryRecord) + Send,
    {
        if interval.is_zero() {
            return Err(DiagnosticError::Config("tick interval must be positive".into()));
        }
        if self.probe_timeout >= interval {
            return Err(DiagnosticError::Config(format!(
                "probe timeout {:?} must be shorter than the tick interval {:?}",
                self.probe_timeout, interval
            )));
        }

        match self.state.compare_exchange(
            SchedulerState::Idle as u8,
            SchedulerState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => {}
            Err(current) => {
                let reason = match SchedulerState::from_u8(current) {
                    SchedulerState::Running => "scheduler is already running",
                    _ => "scheduler has already been cancelled",
                };
                return Err(DiagnosticError::Config(reason.into()));
            }
        }

        if targets.is_empty() {
            tracing::warn!("Scheduler started with no targets");
        }
        tracing::info!(
            "Starting monitor with {} targets every {:?}",
            targets.len(),
            interval
        );

        let targets: Arc<[Target]> = targets.into();
        let wall_base = Utc::now();
        let mono_base = Instant::now();

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let tick_at = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                at = ticker.tick() => at,
            };

            // Derive wall time from the monotonic tick so records stay ordered
            // even if the system clock steps.
            let offset = ChronoDuration::from_std(tick_at.saturating_duration_since(mono_base))
                .unwrap_or_else(|_| ChronoDuration::zero());
            let record = self.run_tick(&targets, wall_base + offset).await;
            on_tick(record);
        }

        self.state.store(SchedulerState::Cancelled as u8, Ordering::SeqCst);
        tracing::info!("Monitor stopped");
        Ok(())
    }

    /// Probe every target concurrently and assemble one record.
    async fn run_tick(&self, targets: &Arc<[Target]>, timestamp: DateTime<Utc>) -> HistoryRecord {
        let mut probes = JoinSet::new();
        for target in targets.iter().cloned() {
            let runner = self.runner.clone();
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                match tokio::time::timeout(timeout, runner.probe(&target, timeout)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        ProbeOutcome::from_result(target, Err(DiagnosticError::Timeout(timeout)))
                    }
                }
            });
        }

        let mut outcomes = Vec::with_capacity(targets.len());
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        let record = HistoryRecord::from_outcomes(timestamp, targets, &outcomes);
        let failed = record.values.values().filter(|v| v.is_none()).count();
        tracing::debug!(
            "Tick at {}: {} targets, {} without reply",
            timestamp,
            record.values.len(),
            failed
        );
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Replies after `delay` for addresses starting with "slow", instantly otherwise.
    struct SplitRunner {
        delay: Duration,
    }

    #[async_trait]
    impl ProbeRunner for SplitRunner {
        async fn measure(&self, address: &str, _timeout: Duration) -> Result<u64, DiagnosticError> {
            if address.starts_with("slow") {
                tokio::time::sleep(self.delay).await;
                return Ok(1);
            }
            Ok(7)
        }
    }

    fn scheduler(delay: Duration, probe_timeout: Duration) -> MonitorScheduler {
        MonitorScheduler::new(Arc::new(SplitRunner { delay }), probe_timeout)
    }

    #[tokio::test]
    async fn test_rejects_timeout_not_below_interval() {
        let s = scheduler(Duration::ZERO, Duration::from_secs(1));
        let err = s
            .run(vec![Target::new("A", "a")], Duration::from_secs(1), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DiagnosticError::Config(_)));
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_target_does_not_stall_tick() {
        let s = Arc::new(scheduler(Duration::from_secs(30), Duration::from_millis(200)));
        let records = Arc::new(Mutex::new(Vec::new()));
        let targets = vec![
            Target::new("fast", "10.0.0.1"),
            Target::new("slow", "slow.example"),
            Target::new("fast2", "10.0.0.2"),
        ];

        let started = Instant::now();
        let token = s.cancel_token();
        let sink = records.clone();
        s.run(targets, Duration::from_secs(1), move |record| {
            sink.lock().push((Instant::now(), record));
            token.cancel();
        })
        .await
        .unwrap();

        let records = records.lock();
        assert_eq!(records.len(), 1);
        let (finished, record) = &records[0];
        assert!(finished.duration_since(started) < Duration::from_secs(1));
        assert_eq!(record.values.len(), 3);
        assert_eq!(record.latency("fast"), Some(7));
        assert_eq!(record.latency("fast2"), Some(7));
        assert!(record.values.contains_key("slow"));
        assert_eq!(record.latency("slow"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_run() {
        let s = scheduler(Duration::ZERO, Duration::from_millis(100));
        s.cancel();
        let mut ticks = 0;
        s.run(vec![Target::new("A", "a")], Duration::from_secs(1), |_| ticks += 1)
            .await
            .unwrap();
        assert_eq!(ticks, 0);
        assert_eq!(s.state(), SchedulerState::Cancelled);

        // A finished scheduler does not start again.
        let again = s
            .run(vec![Target::new("A", "a")], Duration::from_secs(1), |_| ticks += 1)
            .await;
        assert!(matches!(again, Err(DiagnosticError::Config(_))));
        assert_eq!(ticks, 0);
        assert_eq!(s.state(), SchedulerState::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_while_running() {
        let s = Arc::new(scheduler(Duration::ZERO, Duration::from_millis(100)));
        let handle = {
            let s = s.clone();
            tokio::spawn(async move {
                s.run(vec![Target::new("A", "a")], Duration::from_secs(1), |_| {})
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(s.state(), SchedulerState::Running);

        let again = s.run(vec![], Duration::from_secs(1), |_| {}).await;
        assert!(matches!(again, Err(DiagnosticError::Config(_))));

        s.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(s.state(), SchedulerState::Cancelled);
    }
}
