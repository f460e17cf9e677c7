use validator_protocol::{Reading, ViolationRecord};

/// Returns true when the realized reduction falls strictly short of the
/// contracted threshold. Meeting the threshold exactly is compliant.
pub fn is_violation(reading: &Reading) -> bool {
    reading.baseline - reading.average_output < reading.contract_threshold
}

/// Evaluates a reading and builds the violation record it would contribute.
pub fn evaluate(reading: &Reading) -> Option<ViolationRecord> {
    if !is_violation(reading) {
        return None;
    }
    Some(ViolationRecord {
        start_time: reading.start_time.clone(),
        end_time: reading.end_time.clone(),
        average: reading.average_output,
    })
}
