//! Finalization: closing out a project's summary and reporting it.
//!
//! Both the idle monitor and the shutdown drain go through
//! [`Dispatcher::finalize_project`], which takes the summary out of the store
//! before doing any I/O. Whichever trigger takes it first does the work; the
//! other observes an absent project and returns `Ok(None)`.

use chrono::Utc;
use std::sync::Arc;

use validator_protocol::ProjectSummary;

use crate::delivery::{DestinationResolver, ReportSender};
use crate::error::Result;
use crate::report::render_report;
use crate::store::SummaryStore;

#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedReport {
    pub project_id: String,
    pub destination: String,
    pub violation_count: usize,
    pub body: String,
}

#[derive(Clone)]
pub struct Dispatcher {
    resolver: Arc<dyn DestinationResolver>,
    sender: Arc<dyn ReportSender>,
}

impl Dispatcher {
    pub fn new(resolver: Arc<dyn DestinationResolver>, sender: Arc<dyn ReportSender>) -> Self {
        Self { resolver, sender }
    }

    /// Stamps the end time, renders and sends. Not retried; a failed send
    /// is returned to the caller and the summary is gone either way.
    pub fn finalize(&self, mut summary: ProjectSummary) -> Result<FinalizedReport> {
        summary.time_ended = Some(Utc::now().to_rfc3339());
        let body = render_report(&summary);

        let destination = self.resolver.resolve(&summary.project_id)?;
        tracing::info!(
            project_id = %summary.project_id,
            violations = summary.violation_records.len(),
            "Sending event report"
        );
        self.sender.send(&destination, &body)?;

        Ok(FinalizedReport {
            project_id: summary.project_id,
            destination,
            violation_count: summary.violation_records.len(),
            body,
        })
    }

    pub fn finalize_project(
        &self,
        store: &SummaryStore,
        project_id: &str,
    ) -> Result<Option<FinalizedReport>> {
        let Some(summary) = store.take(project_id) else {
            tracing::debug!(project_id = %project_id, "Project already finalized");
            return Ok(None);
        };
        self.finalize(summary).map(Some)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
