//! Entry point for decoded reading batches.

use std::sync::Arc;

use validator_protocol::{
    FaultNotification, ProjectSummary, Reading, ValidateResponse, ValidationError,
    VIOLATION_MESSAGE,
};

use crate::config::TrackingConfig;
use crate::evaluator::evaluate;
use crate::notifier::FaultNotifier;
use crate::store::SummaryStore;

#[derive(Debug)]
pub struct ValidatorService {
    store: Arc<SummaryStore>,
    notifier: Arc<FaultNotifier>,
    tracking: TrackingConfig,
}

impl ValidatorService {
    pub fn new(
        store: Arc<SummaryStore>,
        notifier: Arc<FaultNotifier>,
        tracking: TrackingConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            tracking,
        }
    }

    pub fn store(&self) -> &Arc<SummaryStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<FaultNotifier> {
        &self.notifier
    }

    /// Evaluates a batch in arrival order. The response reflects evaluation
    /// only; notification delivery happens later on the notifier worker.
    pub fn validate_average_outputs(&self, batch: &[Reading]) -> ValidateResponse {
        if batch.is_empty() {
            tracing::info!("No averages found");
            return ValidateResponse::no_data();
        }

        self.store.touch_activity();

        let mut errors = Vec::new();
        for reading in batch {
            let violation = evaluate(reading);
            let violated = violation.is_some();
            match self.store.record(reading, violation, self.tracking) {
                Ok(Some(outcome)) if outcome.created => {
                    tracing::debug!(project_id = %reading.project_id, "Tracking new project");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        project_id = %reading.project_id,
                        error = %err,
                        "Summary store invariant violated"
                    );
                }
            }

            if violated {
                tracing::info!(
                    project_id = %reading.project_id,
                    average = reading.average_output,
                    threshold = reading.contract_threshold,
                    "Validation not met for project"
                );
                errors.push(ValidationError {
                    project_id: reading.project_id.clone(),
                    message: VIOLATION_MESSAGE.to_string(),
                });
                self.notifier
                    .notify(FaultNotification::for_reading(reading));
            }
        }

        tracing::debug!(
            readings = batch.len(),
            violations = errors.len(),
            tracked_projects = self.store.len(),
            "Batch validated"
        );

        ValidateResponse {
            success: errors.is_empty(),
            errors,
        }
    }

    pub fn summaries(&self) -> Vec<ProjectSummary> {
        self.store.snapshot()
    }

    pub fn tracked_projects(&self) -> usize {
        self.store.len()
    }
}
