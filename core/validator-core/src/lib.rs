//! # validator-core
//!
//! Violation aggregation and finalization engine for demand-response
//! telemetry. Request handlers feed decoded reading batches into
//! [`ValidatorService`]; the [`IdleMonitor`] and the shutdown [`drain`]
//! close out tracked projects through the [`Dispatcher`].
//!
//! ## Design Principles
//!
//! - **Synchronous**: std threads and channels, no async runtime.
//! - **One owned store**: [`SummaryStore`] is the only shared mutable state;
//!   callers get copies, never references into it.
//! - **At-most-once finalization**: a summary is taken out of the store
//!   before any report I/O, so two triggers cannot both report it.
//! - **Delivery never fails evaluation**: report and notification errors
//!   are logged where they happen and go no further.

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod drain;
pub mod error;
pub mod evaluator;
pub mod monitor;
pub mod notifier;
pub mod report;
pub mod service;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{load_config, state_dir, ThresholdPolicy, TrackingConfig, ValidatorConfig};
pub use delivery::{
    DestinationResolver, FaultSink, RecipientDirectory, ReportSender, SpoolFaultSink,
    SpoolReportSender,
};
pub use dispatcher::{Dispatcher, FinalizedReport};
pub use drain::{drain, DrainOutcome};
pub use error::{Result, ValidatorError};
pub use evaluator::{evaluate, is_violation};
pub use monitor::{IdleMonitor, MonitorHandle, TickOutcome};
pub use notifier::{FaultNotifier, NotifierStats};
pub use report::render_report;
pub use service::ValidatorService;
pub use store::{RecordOutcome, SummaryStore};
