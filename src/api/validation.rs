/// API-specific validation utilities
///
/// This module provides validation functions specific to API request handling.
/// Delegates to the main validation utilities in utils/validation.rs.

use serde_json::Value;
use crate::utils::validation::InputValidator;

/// API validation wrapper functions
pub struct ApiValidator;

impl ApiValidator {
    /// Validate a telemetry ingest payload (`ingest {vitals...}`).
    pub fn validate_ingest_payload(payload: &Value) -> Result<(), String> {
        InputValidator::validate_ingest_payload(payload).map_err(|e| e.to_string())
    }

    /// Validate an agent registration payload (`agents/register`).
    pub fn validate_registration_payload(payload: &Value) -> Result<(), String> {
        InputValidator::validate_registration_payload(payload).map_err(|e| e.to_string())
    }

    /// Validate an approval decision payload (`approve-healing`).
    pub fn validate_approval_payload(payload: &Value) -> Result<(String, bool), String> {
        InputValidator::validate_approval_payload(payload).map_err(|e| e.to_string())
    }
}