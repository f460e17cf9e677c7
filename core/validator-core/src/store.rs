//! In-memory project summary store.
//!
//! The store is the only mutable state shared between request handlers, the
//! idle monitor and the shutdown drain. Callers never hold a reference into
//! it: every read hands back an owned copy, so slow downstream work (report
//! rendering, delivery) happens outside the lock.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use validator_protocol::{ProjectSummary, Reading, ViolationRecord};

use crate::config::{ThresholdPolicy, TrackingConfig};
use crate::error::{Result, ValidatorError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordOutcome {
    pub created: bool,
    pub violation_count: usize,
}

#[derive(Debug)]
pub struct SummaryStore {
    summaries: Mutex<BTreeMap<String, ProjectSummary>>,
    last_activity: Mutex<Instant>,
}

impl Default for SummaryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SummaryStore {
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(BTreeMap::new()),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn summaries(&self) -> MutexGuard<'_, BTreeMap<String, ProjectSummary>> {
        // A panicking holder cannot leave a torn summary behind: every
        // mutation below is a single map or vec operation.
        self.summaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the summary for `reading.project_id`, opening one
    /// from the reading if none exists. The flag reports whether this call
    /// created it.
    pub fn get_or_create(&self, reading: &Reading) -> (ProjectSummary, bool) {
        let mut summaries = self.summaries();
        let (summary, created) = open_entry(&mut summaries, reading);
        (summary.clone(), created)
    }

    pub fn append_violation(&self, project_id: &str, record: ViolationRecord) -> Result<()> {
        push_violation(&mut self.summaries(), project_id, record).map(|_| ())
    }

    /// Get-or-create, threshold update and append as one step, so a
    /// concurrent finalizer can never take the summary in between.
    ///
    /// Returns `Ok(None)` when the reading is compliant, the project is not
    /// yet tracked, and the tracking policy only opens summaries on
    /// violation. `MissingSummary` here means the open step was skipped.
    pub fn record(
        &self,
        reading: &Reading,
        violation: Option<ViolationRecord>,
        tracking: TrackingConfig,
    ) -> Result<Option<RecordOutcome>> {
        let mut summaries = self.summaries();

        if violation.is_none()
            && !tracking.track_compliant_projects
            && !summaries.contains_key(&reading.project_id)
        {
            return Ok(None);
        }

        let (summary, created) = open_entry(&mut summaries, reading);
        if !created && tracking.threshold_policy == ThresholdPolicy::LastSeen {
            summary.contract_threshold = reading.contract_threshold;
        }
        let current = summary.violation_records.len();
        let violation_count = match violation {
            Some(record) => push_violation(&mut summaries, &reading.project_id, record)?,
            None => current,
        };

        Ok(Some(RecordOutcome {
            created,
            violation_count,
        }))
    }

    pub fn get(&self, project_id: &str) -> Option<ProjectSummary> {
        self.summaries().get(project_id).cloned()
    }

    /// Copies of every tracked summary, ordered by project id.
    pub fn snapshot(&self) -> Vec<ProjectSummary> {
        self.summaries().values().cloned().collect()
    }

    pub fn project_ids(&self) -> Vec<String> {
        self.summaries().keys().cloned().collect()
    }

    /// Removes and returns the summary. Only one caller can ever receive a
    /// given summary, which is what makes finalization at-most-once.
    pub fn take(&self, project_id: &str) -> Option<ProjectSummary> {
        self.summaries().remove(project_id)
    }

    /// Idempotent; returns whether anything was removed.
    pub fn remove(&self, project_id: &str) -> bool {
        self.take(project_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.summaries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries().is_empty()
    }

    pub fn touch_activity(&self) {
        self.touch_activity_at(Instant::now());
    }

    pub fn touch_activity_at(&self, at: Instant) {
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if at > *last {
            *last = at;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_entry<'a>(
    summaries: &'a mut BTreeMap<String, ProjectSummary>,
    reading: &Reading,
) -> (&'a mut ProjectSummary, bool) {
    let mut created = false;
    let summary = summaries
        .entry(reading.project_id.clone())
        .or_insert_with(|| {
            created = true;
            ProjectSummary::open(reading)
        });
    (summary, created)
}

/// Appends under an already-held lock and returns the new violation count.
fn push_violation(
    summaries: &mut BTreeMap<String, ProjectSummary>,
    project_id: &str,
    record: ViolationRecord,
) -> Result<usize> {
    match summaries.get_mut(project_id) {
        Some(summary) => {
            summary.violation_records.push(record);
            Ok(summary.violation_records.len())
        }
        None => Err(ValidatorError::MissingSummary(project_id.to_string())),
    }
}
