//! Recording doubles for the outbound collaborators.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use validator_protocol::{FaultNotification, Reading, ViolationRecord};

use crate::delivery::{DestinationResolver, FaultSink, ReportSender};
use crate::error::{Result, ValidatorError};
use crate::evaluator::evaluate;

pub fn reading(
    project_id: &str,
    baseline: f64,
    average_output: f64,
    contract_threshold: f64,
) -> Reading {
    Reading {
        project_id: project_id.to_string(),
        baseline,
        average_output,
        contract_threshold,
        start_time: "2026-01-30T12:00:00Z".to_string(),
        end_time: "2026-01-30T12:05:00Z".to_string(),
    }
}

pub fn violation_for(reading: &Reading) -> Option<ViolationRecord> {
    evaluate(reading)
}

/// Resolves `<project>@reports.test`, except for projects listed as unknown.
#[derive(Debug, Default)]
pub struct StaticResolver {
    unknown: BTreeSet<String>,
}

impl StaticResolver {
    pub fn without(project_ids: &[&str]) -> Self {
        Self {
            unknown: project_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

impl DestinationResolver for StaticResolver {
    fn resolve(&self, project_id: &str) -> Result<String> {
        if self.unknown.contains(project_id) {
            return Err(ValidatorError::DestinationNotFound(project_id.to_string()));
        }
        Ok(format!("{}@reports.test", project_id))
    }
}

#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String)>>,
    failing: BTreeSet<String>,
    blocked: Option<(String, Mutex<Receiver<()>>)>,
}

impl RecordingSender {
    pub fn failing_for(destinations: &[&str]) -> Self {
        Self {
            failing: destinations.iter().map(|d| d.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Sends to `destination` block until the returned sender is used or
    /// dropped.
    pub fn blocking_on(destination: &str) -> (Self, Sender<()>) {
        let (release, gate) = mpsc::channel();
        let sender = Self {
            blocked: Some((destination.to_string(), Mutex::new(gate))),
            ..Self::default()
        };
        (sender, release)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.sent().into_iter().map(|(to, _)| to).collect();
        destinations.sort();
        destinations
    }
}

impl ReportSender for RecordingSender {
    fn send(&self, destination: &str, report: &str) -> Result<()> {
        if let Some((blocked, gate)) = &self.blocked {
            if blocked == destination {
                let gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = gate.recv();
            }
        }
        if self.failing.contains(destination) {
            return Err(ValidatorError::DeliveryFailed {
                target: destination.to_string(),
                details: "mail relay rejected message".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((destination.to_string(), report.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingFaultSink {
    delivered: Mutex<Vec<FaultNotification>>,
    fail_all: bool,
    gate: Option<Mutex<Receiver<()>>>,
}

impl RecordingFaultSink {
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Every delivery waits for one message on the returned sender (or for
    /// it to be dropped).
    pub fn gated() -> (Self, Sender<()>) {
        let (open, gate) = mpsc::channel();
        let sink = Self {
            gate: Some(Mutex::new(gate)),
            ..Self::default()
        };
        (sink, open)
    }

    pub fn delivered(&self) -> Vec<FaultNotification> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FaultSink for RecordingFaultSink {
    fn deliver(&self, notification: &FaultNotification) -> Result<()> {
        if let Some(gate) = &self.gate {
            let gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = gate.recv();
        }
        if self.fail_all {
            return Err(ValidatorError::DeliveryFailed {
                target: notification.project_id.clone(),
                details: "notification endpoint unavailable".to_string(),
            });
        }
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}
