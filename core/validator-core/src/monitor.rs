//! Idle monitor: finalizes every tracked project once telemetry goes quiet.
//!
//! The loop waits on a stop channel with `recv_timeout(check_interval)`. A
//! timeout is a tick; a stop message or a dropped handle ends the loop, so
//! cancellation is seen at every sleep boundary.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::dispatcher::Dispatcher;
use crate::store::SummaryStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Active,
    Idle {
        finalized: Vec<String>,
        failed: Vec<String>,
    },
}

#[derive(Debug)]
pub struct IdleMonitor {
    store: Arc<SummaryStore>,
    dispatcher: Dispatcher,
    check_interval: Duration,
    idle_threshold: Duration,
}

impl IdleMonitor {
    pub fn new(
        store: Arc<SummaryStore>,
        dispatcher: Dispatcher,
        check_interval: Duration,
        idle_threshold: Duration,
    ) -> Self {
        Self {
            store,
            dispatcher,
            check_interval,
            idle_threshold,
        }
    }

    pub fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.store.last_activity()) > self.idle_threshold
    }

    /// One check. When idle, finalizes every project present right now;
    /// a project taken by another trigger in the meantime is skipped.
    pub fn tick(&self, now: Instant) -> TickOutcome {
        if !self.is_idle(now) {
            return TickOutcome::Active;
        }

        let project_ids = self.store.project_ids();
        if project_ids.is_empty() {
            return TickOutcome::Idle {
                finalized: Vec::new(),
                failed: Vec::new(),
            };
        }

        tracing::info!(
            projects = project_ids.len(),
            "Telemetry idle; finalizing tracked projects"
        );

        let mut finalized = Vec::new();
        let mut failed = Vec::new();
        for project_id in project_ids {
            match self.dispatcher.finalize_project(&self.store, &project_id) {
                Ok(Some(report)) => {
                    tracing::info!(
                        project_id = %report.project_id,
                        violations = report.violation_count,
                        "Project finalized after idle period"
                    );
                    finalized.push(project_id);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        project_id = %project_id,
                        error = %err,
                        "Failed to finalize project"
                    );
                    failed.push(project_id);
                }
            }
        }

        TickOutcome::Idle { finalized, failed }
    }

    pub fn spawn(self) -> MonitorHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(self.check_interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        self.tick(Instant::now());
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        tracing::debug!("Idle monitor stopped");
                        break;
                    }
                }
            }
            let _ = done_tx.send(());
        });

        MonitorHandle {
            stop: stop_tx,
            done: done_rx,
            handle,
        }
    }
}

#[derive(Debug)]
pub struct MonitorHandle {
    stop: Sender<()>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signals the loop and waits up to `wait` for it to exit. A tick stuck
    /// in delivery is left detached; projects it has not taken yet stay in
    /// the store for the drain. Returns whether the loop exited in time.
    pub fn stop(self, wait: Duration) -> bool {
        let _ = self.stop.send(());
        match self.done.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::error!("Idle monitor thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    wait = ?wait,
                    "Idle monitor tick still running; abandoning it"
                );
                false
            }
        }
    }
}
