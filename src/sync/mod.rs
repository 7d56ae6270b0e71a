//! Sync - The background driver
//!
//! Polls the [`PendingSignal`] on a fixed interval and runs one full engine
//! cycle whenever it is raised. Two states only: idle (waiting for a tick)
//! and syncing (a cycle in flight). A stop request is honored while idle;
//! a running cycle always completes, rollback included, before the loop
//! looks at it.

mod signal;

pub use signal::PendingSignal;

use crate::engine::{CycleOutcome, CycleReport, RollbackStatus, SyncEngine};
use crate::git::GitOps;
use crate::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Counters for what a loop run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub successes: u64,
    pub no_ops: u64,
    pub aborted: u64,
    pub rollback_failures: u64,
}

impl LoopStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        match report.outcome {
            CycleOutcome::NoOp => self.no_ops += 1,
            CycleOutcome::Success { .. } => self.successes += 1,
            CycleOutcome::Aborted { .. } => self.aborted += 1,
        }
        if matches!(report.rollback, RollbackStatus::Failed { .. }) {
            self.rollback_failures += 1;
        }
    }
}

/// Single-flow driver owning the engine for its whole lifetime
pub struct SyncLoop<G> {
    engine: SyncEngine<G>,
    signal: Arc<PendingSignal>,
    interval: Duration,
}

impl<G> SyncLoop<G>
where
    G: GitOps + Send + 'static,
{
    /// Poll at the engine's configured interval
    pub fn new(engine: SyncEngine<G>, signal: Arc<PendingSignal>) -> Self {
        let interval = engine.config().poll_interval();
        Self {
            engine,
            signal,
            interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Handle for the watcher side
    pub fn signal(&self) -> Arc<PendingSignal> {
        Arc::clone(&self.signal)
    }

    /// Run until `shutdown` resolves, then return what was done
    pub async fn run<F>(self, shutdown: F) -> Result<LoopStats>
    where
        F: Future<Output = ()>,
    {
        let Self {
            mut engine,
            signal,
            interval,
        } = self;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut stats = LoopStats::default();
        info!("Sync loop started (interval {:?})", interval);

        loop {
            // Idle
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Stop requested, sync loop exiting");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if !signal.is_raised() {
                continue;
            }

            // Syncing: the engine moves to a blocking thread and comes back
            // with the report. Not raced against shutdown.
            debug!("Changes pending, starting cycle");
            let (returned, report) = tokio::task::spawn_blocking(move || {
                let report = engine.run_cycle();
                (engine, report)
            })
            .await?;
            engine = returned;

            signal.clear();
            stats.record(&report);
        }

        Ok(stats)
    }
}
