//! Input validation module
//!
//! Validates readings, activity entries and query parameters before they
//! reach the ingest pipeline or storage.

use crate::error::{AppError, AppResult};
use crate::models::{ActivityInput, Reading};
use tracing::{debug, warn};
use validator::{Validate, ValidationErrors};

/// Query limits
pub struct QueryConstraints;

impl QueryConstraints {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 1000;
}

fn describe(validation_errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = validation_errors
        .field_errors()
        .iter()
        .map(|(field, errors)| {
            let msgs: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.message.as_ref().map(|c| c.as_ref()))
                .collect();
            format!("{}: {}", field, msgs.join(", "))
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

/// Validate an incoming reading
pub fn validate_reading(reading: &Reading) -> AppResult<()> {
    if let Err(validation_errors) = reading.validate() {
        let message = describe(&validation_errors);
        warn!(errors = %message, "Reading validation failed");
        return Err(AppError::ValidationError(message));
    }

    if !reading.value.is_finite() {
        return Err(AppError::ValidationError(
            "Value must be a finite number".to_string(),
        ));
    }

    debug!(device_id = reading.device_id, "Reading validation passed");
    Ok(())
}

/// Validate an activity entry
pub fn validate_activity(input: &ActivityInput) -> AppResult<()> {
    input
        .validate()
        .map_err(|errors| AppError::ValidationError(describe(&errors)))
}

/// Validate a device id taken from the request path
pub fn validate_device_id(device_id: i32) -> AppResult<i32> {
    if device_id < 1 {
        return Err(AppError::BadRequest(format!(
            "Device id must be a positive integer, got {device_id}"
        )));
    }
    Ok(device_id)
}

/// Validate the `limit` query parameter
pub fn validate_limit(limit: Option<u32>) -> AppResult<u32> {
    let limit = limit.unwrap_or(QueryConstraints::DEFAULT_LIMIT);

    if limit == 0 || limit > QueryConstraints::MAX_LIMIT {
        return Err(AppError::ValidationError(format!(
            "Limit must be between 1 and {}",
            QueryConstraints::MAX_LIMIT
        )));
    }

    Ok(limit)
}
