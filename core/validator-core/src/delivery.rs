//! Seams to the outbound collaborators.
//!
//! The engine only decides that a report or fault notification must go out
//! and what it contains. Transport lives behind these traits. The shipped
//! implementations spool to disk for a relay process to pick up.

use chrono::Utc;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use validator_protocol::FaultNotification;

use crate::config::ValidatorConfig;
use crate::error::{Result, ValidatorError};

pub trait ReportSender: Send + Sync {
    fn send(&self, destination: &str, report: &str) -> Result<()>;
}

pub trait DestinationResolver: Send + Sync {
    fn resolve(&self, project_id: &str) -> Result<String>;
}

pub trait FaultSink: Send + Sync {
    fn deliver(&self, notification: &FaultNotification) -> Result<()>;
}

/// Resolves report recipients from the `[recipients]` config table.
#[derive(Debug, Clone, Default)]
pub struct RecipientDirectory {
    recipients: BTreeMap<String, String>,
}

impl RecipientDirectory {
    pub fn new(recipients: BTreeMap<String, String>) -> Self {
        Self { recipients }
    }
}

impl DestinationResolver for RecipientDirectory {
    fn resolve(&self, project_id: &str) -> Result<String> {
        self.recipients
            .get(project_id)
            .map(|address| address.trim())
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ValidatorError::DestinationNotFound(project_id.to_string()))
    }
}

/// Writes each report as a mail-shaped text file in an outbox directory.
#[derive(Debug)]
pub struct SpoolReportSender {
    outbox_dir: PathBuf,
    from: String,
    subject: String,
    sequence: AtomicU64,
}

impl SpoolReportSender {
    pub fn new(outbox_dir: PathBuf, from: String, subject: String) -> Self {
        Self {
            outbox_dir,
            from,
            subject,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &ValidatorConfig, state_dir: &Path) -> Self {
        let from = format!(
            "{} <{}>",
            config.reports.sender_name, config.reports.sender_address
        );
        Self::new(
            config.reports_outbox_dir(state_dir),
            from,
            config.reports.subject.clone(),
        )
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }
}

impl ReportSender for SpoolReportSender {
    fn send(&self, destination: &str, report: &str) -> Result<()> {
        fs_err::create_dir_all(&self.outbox_dir).map_err(|err| ValidatorError::Io {
            context: "creating report outbox".to_string(),
            source: err,
        })?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let file_name = format!(
            "{}-{}-{}.eml",
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            sequence,
            file_safe(destination)
        );
        let message = format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.from, destination, self.subject, report
        );

        let path = self.outbox_dir.join(file_name);
        fs_err::write(&path, message).map_err(|err| ValidatorError::DeliveryFailed {
            target: destination.to_string(),
            details: err.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Report spooled");
        Ok(())
    }
}

/// Appends one JSON line per fault notification.
#[derive(Debug)]
pub struct SpoolFaultSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SpoolFaultSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FaultSink for SpoolFaultSink {
    fn deliver(&self, notification: &FaultNotification) -> Result<()> {
        let mut line = serde_json::to_vec(notification).map_err(|err| ValidatorError::Json {
            context: "serializing fault notification".to_string(),
            source: err,
        })?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|err| ValidatorError::Io {
                context: "creating fault outbox".to_string(),
                source: err,
            })?;
        }
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| ValidatorError::DeliveryFailed {
                target: notification.project_id.clone(),
                details: err.to_string(),
            })?;
        file.write_all(&line)
            .map_err(|err| ValidatorError::DeliveryFailed {
                target: notification.project_id.clone(),
                details: err.to_string(),
            })
    }
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
