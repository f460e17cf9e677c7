//! Fault notifier: a bounded queue drained by one delivery worker.
//!
//! `notify` never blocks the evaluation path. When the queue is full or
//! already closed the notification is dropped and counted. Delivery failures
//! stay inside the worker.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use validator_protocol::FaultNotification;

use crate::delivery::FaultSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotifierStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> NotifierStats {
        NotifierStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub struct FaultNotifier {
    queue: Mutex<Option<SyncSender<FaultNotification>>>,
    worker: Mutex<Option<(JoinHandle<()>, Receiver<()>)>>,
    counters: Arc<Counters>,
}

impl FaultNotifier {
    pub fn start(sink: Arc<dyn FaultSink>, capacity: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::sync_channel::<FaultNotification>(capacity.max(1));
        let (done_tx, done_rx) = mpsc::channel();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);

        let handle = thread::spawn(move || {
            for notification in queue_rx {
                match sink.deliver(&notification) {
                    Ok(()) => {
                        worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            project_id = %notification.project_id,
                            "Fault notification delivered"
                        );
                    }
                    Err(err) => {
                        worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            project_id = %notification.project_id,
                            error = %err,
                            "Fault notification delivery failed"
                        );
                    }
                }
            }
            let _ = done_tx.send(());
        });

        Self {
            queue: Mutex::new(Some(queue_tx)),
            worker: Mutex::new(Some((handle, done_rx))),
            counters,
        }
    }

    /// Hands a notification to the delivery worker without waiting.
    pub fn notify(&self, notification: FaultNotification) {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = queue.as_ref() else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                project_id = %notification.project_id,
                "Fault notifier closed; dropping notification"
            );
            return;
        };

        match sender.try_send(notification) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(notification)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    project_id = %notification.project_id,
                    "Fault notification queue full; dropping notification"
                );
            }
            Err(TrySendError::Disconnected(notification)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    project_id = %notification.project_id,
                    "Fault notification worker gone; dropping notification"
                );
            }
        }
    }

    pub fn stats(&self) -> NotifierStats {
        self.counters.snapshot()
    }

    /// Closes the queue and waits up to `wait` for queued notifications to
    /// be attempted. Later calls return immediately.
    pub fn shutdown(&self, wait: Duration) -> NotifierStats {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((handle, done)) = worker {
            match done.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    let _ = handle.join();
                }
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!(
                        wait = ?wait,
                        "Fault notifier did not drain in time; abandoning worker"
                    );
                }
            }
        }

        self.counters.snapshot()
    }
}
