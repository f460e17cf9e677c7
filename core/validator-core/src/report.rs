use std::fmt::Write as _;

use validator_protocol::ProjectSummary;

/// Renders the end-of-event report sent to a project's owner.
pub fn render_report(summary: &ProjectSummary) -> String {
    let mut out = String::new();
    let time_ended = summary.time_ended.as_deref().unwrap_or("");

    // Writing into a String cannot fail.
    let _ = writeln!(out, "Validation Report");
    let _ = writeln!(out, "-----------------");
    let _ = writeln!(out, "Project ID: {}", summary.project_id);
    let _ = writeln!(out, "Time Started: {}", summary.time_started);
    let _ = writeln!(out, "Time Ended: {}", time_ended);
    let _ = writeln!(out, "Contract Threshold: {:.2}", summary.contract_threshold);
    let _ = writeln!(out);
    let _ = writeln!(out, "Total Violations: {}", summary.violation_records.len());
    let _ = writeln!(out);

    if !summary.violation_records.is_empty() {
        let _ = writeln!(out, "Violation Intervals:");
        for violation in &summary.violation_records {
            let _ = writeln!(
                out,
                "- Start: {} | End: {} | Average: {:.2}",
                violation.start_time, violation.end_time, violation.average
            );
        }
    }

    out
}
