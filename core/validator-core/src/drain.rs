//! Shutdown drain: best-effort finalization of everything still tracked.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::store::SummaryStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainOutcome {
    pub finalized: Vec<String>,
    pub failed: Vec<String>,
    /// Still in flight when the timeout elapsed.
    pub abandoned: Vec<String>,
}

impl DrainOutcome {
    pub fn is_complete(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Finalizes every project present at call time, one thread each, and
/// returns when all have finished or `timeout` elapses. Threads still
/// running at the deadline are left detached.
pub fn drain(store: Arc<SummaryStore>, dispatcher: Dispatcher, timeout: Duration) -> DrainOutcome {
    // `None` when the timeout is too large to represent; wait without a cap.
    let deadline = Instant::now().checked_add(timeout);
    let project_ids = store.project_ids();
    let mut outcome = DrainOutcome::default();
    if project_ids.is_empty() {
        tracing::info!("No tracked projects to finalize at shutdown");
        return outcome;
    }

    tracing::info!(projects = project_ids.len(), "Sending final reports");

    let (result_tx, result_rx) = mpsc::channel();
    let mut pending: BTreeSet<String> = BTreeSet::new();
    for project_id in project_ids {
        let store = Arc::clone(&store);
        let dispatcher = dispatcher.clone();
        let result_tx = result_tx.clone();
        pending.insert(project_id.clone());
        thread::spawn(move || {
            let result = dispatcher.finalize_project(&store, &project_id);
            let _ = result_tx.send((project_id, result));
        });
    }
    drop(result_tx);

    while !pending.is_empty() {
        let remaining = deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
            .unwrap_or(timeout);
        match result_rx.recv_timeout(remaining) {
            Ok((project_id, result)) => {
                pending.remove(&project_id);
                match result {
                    Ok(Some(report)) => {
                        tracing::info!(
                            project_id = %project_id,
                            violations = report.violation_count,
                            "Final report sent"
                        );
                        outcome.finalized.push(project_id);
                    }
                    Ok(None) => {
                        tracing::debug!(
                            project_id = %project_id,
                            "Project finalized by another trigger"
                        );
                    }
                    Err(err) => {
                        tracing::error!(
                            project_id = %project_id,
                            error = %err,
                            "Failed to send final report"
                        );
                        outcome.failed.push(project_id);
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    pending = pending.len(),
                    timeout = ?timeout,
                    "Shutdown drain timed out; abandoning in-flight reports"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    outcome.abandoned = pending.into_iter().collect();
    outcome.finalized.sort();
    outcome.failed.sort();
    outcome
}
