//! Shared range-validation helpers used by all domain validators.

/// Push an error if `value` is outside `[min, max]`.
pub(crate) fn validate_range(errors: &mut Vec<String>, name: &str, value: u32, min: u32, max: u32) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}

/// Push an error if `value` is outside `[min, max]` (durations and sizes).
pub(crate) fn validate_range_u64(
    errors: &mut Vec<String>,
    name: &str,
    value: u64,
    min: u64,
    max: u64,
) {
    if value < min || value > max {
        errors.push(format!("{name} = {value} is out of range [{min}, {max}]"));
    }
}
