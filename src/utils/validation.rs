//! Request payload validation for the control and ingest HTTP surface.

use serde_json::Value;

use crate::utils::error::{ImmuneError, ImmuneResult};

/// Input validation utilities for the HTTP API.
pub struct InputValidator;

impl InputValidator {
    /// Validates `ingest {vitals...}`: must identify an agent and report a latency.
    pub fn validate_ingest_payload(payload: &Value) -> ImmuneResult<()> {
        let agent_id = payload.get("agent_id").and_then(Value::as_str).unwrap_or_default();
        if agent_id.trim().is_empty() {
            return Err(ImmuneError::ValidationError {
                field: "agent_id".to_string(),
                reason: "missing or empty".to_string(),
            });
        }

        match payload.get("latency_ms").and_then(Value::as_f64) {
            Some(latency) if latency >= 0.0 => {}
            Some(_) => {
                return Err(ImmuneError::ValidationError {
                    field: "latency_ms".to_string(),
                    reason: "must be non-negative".to_string(),
                })
            }
            None => {
                return Err(ImmuneError::ValidationError {
                    field: "latency_ms".to_string(),
                    reason: "missing or not a number".to_string(),
                })
            }
        }

        if payload.get("success").and_then(Value::as_bool).is_none() {
            return Err(ImmuneError::ValidationError {
                field: "success".to_string(),
                reason: "missing or not a boolean".to_string(),
            });
        }

        Ok(())
    }

    /// Validates `agents/register {agent_id, agent_type, model}`.
    pub fn validate_registration_payload(payload: &Value) -> ImmuneResult<()> {
        for field in ["agent_id", "agent_type", "model"] {
            match payload.get(field).and_then(Value::as_str) {
                Some(value) if !value.trim().is_empty() => {}
                _ => {
                    return Err(ImmuneError::ValidationError {
                        field: field.to_string(),
                        reason: "missing, empty, or not a string".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Validates `approve-healing {agent_id, approved: bool}`.
    pub fn validate_approval_payload(payload: &Value) -> ImmuneResult<(String, bool)> {
        let agent_id = payload.get("agent_id").and_then(Value::as_str).unwrap_or_default();
        if agent_id.trim().is_empty() {
            return Err(ImmuneError::ValidationError {
                field: "agent_id".to_string(),
                reason: "missing or empty".to_string(),
            });
        }
        let approved = payload.get("approved").and_then(Value::as_bool).ok_or_else(|| ImmuneError::ValidationError {
            field: "approved".to_string(),
            reason: "missing or not a boolean".to_string(),
        })?;
        Ok((agent_id.to_string(), approved))
    }

    /// Validates `approve-all {approved: bool}`.
    pub fn validate_approve_all_payload(payload: &Value) -> ImmuneResult<bool> {
        payload.get("approved").and_then(Value::as_bool).ok_or_else(|| ImmuneError::ValidationError {
            field: "approved".to_string(),
            reason: "missing or not a boolean".to_string(),
        })
    }

    /// Validates `heal-explicitly {agent_id}`.
    pub fn validate_agent_id_payload(payload: &Value) -> ImmuneResult<String> {
        let agent_id = payload.get("agent_id").and_then(Value::as_str).unwrap_or_default();
        if agent_id.trim().is_empty() {
            return Err(ImmuneError::ValidationError {
                field: "agent_id".to_string(),
                reason: "missing or empty".to_string(),
            });
        }
        Ok(agent_id.to_string())
    }

    /// Validates a path-parameter agent id (non-empty, no path-traversal characters).
    pub fn validate_agent_id(agent_id: &str) -> ImmuneResult<()> {
        if agent_id.trim().is_empty() || agent_id.contains(['/', '\\', '\0']) {
            return Err(ImmuneError::ValidationError {
                field: "agent_id".to_string(),
                reason: "empty or contains invalid characters".to_string(),
            });
        }
        Ok(())
    }

    /// Sanitizes free-text fields (e.g. `agent_type`, `model`) before they're
    /// used in log lines or stored: strips control characters, caps length.
    pub fn sanitize_string(input: &str) -> String {
        let truncated = if input.len() > 256 { &input[..256] } else { input };
        truncated.chars().filter(|c| !c.is_control()).collect::<String>().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ingest_payload_requires_agent_id_and_latency() {
        assert!(InputValidator::validate_ingest_payload(&json!({"latency_ms": 10.0, "success": true})).is_err());
        assert!(InputValidator::validate_ingest_payload(&json!({"agent_id": "a1", "success": true})).is_err());
        assert!(InputValidator::validate_ingest_payload(&json!({"agent_id": "a1", "latency_ms": -1.0, "success": true})).is_err());
        assert!(InputValidator::validate_ingest_payload(&json!({"agent_id": "a1", "latency_ms": 10.0, "success": true})).is_ok());
    }

    #[test]
    fn approval_payload_extracts_decision() {
        let (agent_id, approved) = InputValidator::validate_approval_payload(&json!({"agent_id": "a1", "approved": true})).unwrap();
        assert_eq!(agent_id, "a1");
        assert!(approved);
    }

    #[test]
    fn agent_id_rejects_path_traversal() {
        assert!(InputValidator::validate_agent_id("../etc/passwd").is_err());
        assert!(InputValidator::validate_agent_id("agent-1").is_ok());
    }
}
