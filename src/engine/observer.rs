//! Observer - Where cycle results go
//!
//! The engine never configures logging itself. It is handed an observer at
//! construction and reports through it, so tests can record reports instead
//! of scraping log output.

use super::{CycleOutcome, CycleReport, CycleStage, RollbackStatus};
use crate::Error;
use tracing::{error, info, warn};

/// Receives cycle results and tolerated failures from a [`super::SyncEngine`]
pub trait CycleObserver: Send + Sync {
    /// Called exactly once per cycle, after rollback
    fn cycle_finished(&self, report: &CycleReport);

    /// A step failed but the cycle carried on without it
    fn step_failed(&self, stage: CycleStage, error: &Error) {
        let _ = (stage, error);
    }

    /// Rollback could not restore the developer's branch.
    /// Implementations must make this impossible to miss.
    fn escalate(&self, error: &Error);
}

/// Production observer: structured `tracing` events, plus stderr on escalation
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl CycleObserver for TracingObserver {
    fn cycle_finished(&self, report: &CycleReport) {
        let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();
        let origin = report.origin_branch.as_deref().unwrap_or("-");
        let outcome = report.outcome.label();

        match &report.outcome {
            CycleOutcome::NoOp => {
                info!(outcome, origin, elapsed_ms, "Working tree clean, nothing to save");
            }
            CycleOutcome::Success {
                commit,
                transplant,
                excluded,
            } => {
                let commit = commit.as_ref().map_or("none", |c| c.short());
                info!(
                    outcome,
                    origin,
                    commit,
                    transplant = ?transplant,
                    excluded = excluded.len(),
                    elapsed_ms,
                    "Auto-saved working tree"
                );
            }
            CycleOutcome::Aborted { stage, reason } => {
                warn!(outcome, origin, %stage, elapsed_ms, "Cycle aborted: {}", reason);
            }
        }

        if let RollbackStatus::Failed { reason } = &report.rollback {
            error!(origin, "Rollback failed: {}", reason);
        }
    }

    fn step_failed(&self, stage: CycleStage, error: &Error) {
        warn!(%stage, "Continuing without {}: {}", stage, error);
    }

    fn escalate(&self, error: &Error) {
        error!(target: "flatworm::escalation", "Repository needs manual attention: {}", error);
        eprintln!("================================================================");
        eprintln!("flatworm: could not restore your branch");
        eprintln!("  {error}");
        eprintln!("  Check `git status` and `git log -1` before continuing work.");
        eprintln!("================================================================");
    }
}
