//! IPC protocol types and validation for validator-daemon.
//!
//! This crate is shared by the daemon and its clients so the batch schema
//! cannot drift between them. The daemon remains the authority on
//! validation; clients reuse the same types to build well-formed batches.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_PROJECT_ID_LEN: usize = 128;

/// Message attached to every violating reading, in the batch response and
/// in the outbound fault notification.
pub const VIOLATION_MESSAGE: &str = "Validation is below the threshold";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    ValidateAverageOutputs,
    GetSummaries,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// One interval of averaged output for a single project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reading {
    pub project_id: String,
    pub baseline: f64,
    pub average_output: f64,
    pub contract_threshold: f64,
    pub start_time: String,
    pub end_time: String,
}

impl Reading {
    /// Rejects readings that are structurally unusable. Degenerate but finite
    /// values (zero baseline, negative threshold) are left for the evaluator.
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.project_id.trim().is_empty() {
            return Err(ErrorInfo::new(
                "invalid_project_id",
                "project_id is required",
            ));
        }
        if self.project_id.len() > MAX_PROJECT_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_project_id",
                format!(
                    "project_id must be {} characters or fewer",
                    MAX_PROJECT_ID_LEN
                ),
            ));
        }

        require_finite(self.baseline, "baseline")?;
        require_finite(self.average_output, "average_output")?;
        require_finite(self.contract_threshold, "contract_threshold")?;
        require_rfc3339(&self.start_time, "start_time")?;
        require_rfc3339(&self.end_time, "end_time")?;

        Ok(())
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateParams {
    #[serde(default)]
    pub average_outputs: Vec<Reading>,
}

/// Decodes and checks a `validate_average_outputs` payload. An empty batch is
/// returned as-is; the service decides what "no data" means.
pub fn parse_batch(params: Option<Value>) -> Result<Vec<Reading>, ErrorInfo> {
    let params = match params {
        Some(Value::Null) | None => return Ok(Vec::new()),
        Some(params) => params,
    };

    let parsed: ValidateParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("batch payload is invalid: {}", err),
        )
    })?;

    for (index, reading) in parsed.average_outputs.iter().enumerate() {
        reading.validate().map_err(|err| {
            ErrorInfo::new(&err.code, format!("reading {}: {}", index, err.message))
        })?;
    }

    Ok(parsed.average_outputs)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub project_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidateResponse {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ValidationError>,
}

impl ValidateResponse {
    pub fn no_data() -> Self {
        Self {
            success: false,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub start_time: String,
    pub end_time: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub time_started: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ended: Option<String>,
    pub contract_threshold: f64,
    #[serde(default)]
    pub violation_records: Vec<ViolationRecord>,
}

impl ProjectSummary {
    pub fn open(reading: &Reading) -> Self {
        Self {
            project_id: reading.project_id.clone(),
            time_started: reading.start_time.clone(),
            time_ended: None,
            contract_threshold: reading.contract_threshold,
            violation_records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultNotification {
    pub project_id: String,
    pub message: String,
    pub start_time: String,
    pub end_time: String,
    pub average: f64,
}

impl FaultNotification {
    pub fn for_reading(reading: &Reading) -> Self {
        Self {
            project_id: reading.project_id.clone(),
            message: VIOLATION_MESSAGE.to_string(),
            start_time: reading.start_time.clone(),
            end_time: reading.end_time.clone(),
            average: reading.average_output,
        }
    }
}

fn require_finite(value: f64, field: &str) -> Result<(), ErrorInfo> {
    if value.is_finite() {
        return Ok(());
    }
    Err(ErrorInfo::new(
        "invalid_reading",
        format!("{} must be a finite number", field),
    ))
}

fn require_rfc3339(value: &str, field: &str) -> Result<(), ErrorInfo> {
    if DateTime::parse_from_rfc3339(value).is_ok() {
        return Ok(());
    }
    Err(ErrorInfo::new(
        "invalid_timestamp",
        format!("{} must be RFC3339", field),
    ))
}
