use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{event, Level};

/// Structured logging for the immune control plane's observable events.
///
/// Every lifecycle transition, healing attempt, infection detection, and approval
/// decision goes through one of these so operators can grep/alert on a stable field set
/// instead of parsing prose log lines.
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log a lifecycle phase transition (or blocked attempt).
    pub fn log_lifecycle_event(agent_id: &str, from: &str, to: &str, reason: &str, allowed: bool) {
        if allowed {
            event!(
                Level::INFO,
                agent_id,
                from,
                to,
                reason,
                "lifecycle transition"
            );
        } else {
            event!(
                Level::WARN,
                agent_id,
                from,
                to,
                reason,
                "blocked lifecycle transition"
            );
        }
    }

    /// Log an anomaly detected by the sentinel.
    pub fn log_infection_event(agent_id: &str, kinds: &[String], max_deviation: f64, fleet_wide: bool) {
        event!(
            Level::WARN,
            agent_id,
            anomaly_kinds = ?kinds,
            max_deviation,
            fleet_wide,
            "infection detected"
        );
    }

    /// Log a diagnosis result.
    pub fn log_diagnosis_event(agent_id: &str, primary_kind: &str, confidence: f64, hypothesis_count: usize) {
        event!(
            Level::INFO,
            agent_id,
            primary_kind,
            confidence,
            hypothesis_count,
            "diagnosis produced"
        );
    }

    /// Log a healing action attempt and its outcome.
    pub fn log_healing_event(agent_id: &str, action: &str, diagnosis_kind: &str, success: bool) {
        event!(
            Level::INFO,
            agent_id,
            action,
            diagnosis_kind,
            success,
            "healing action executed"
        );
    }

    /// Log a quarantine/enforcement action.
    pub fn log_enforcement_event(agent_id: &str, action: &str, backend: &str, success: bool) {
        event!(
            Level::INFO,
            agent_id,
            action,
            backend,
            success,
            "enforcement action executed"
        );
    }

    /// Log an operator approval decision.
    pub fn log_approval_event(agent_id: &str, approved: bool, heal_now: bool) {
        event!(
            Level::INFO,
            agent_id,
            approved,
            heal_now,
            "operator approval decision"
        );
    }

    /// Log operator feedback on a past diagnosis.
    pub fn log_feedback_event(agent_id: &str, diagnosis_kind: &str, verdict: &str) {
        event!(
            Level::INFO,
            agent_id,
            diagnosis_kind,
            verdict,
            "operator feedback recorded"
        );
    }

    /// Log an API request for debugging and audit.
    pub fn log_api_request(method: &str, path: &str, status_code: u16, duration_ms: u64, client_id: &str) {
        match status_code {
            200..=299 => event!(Level::INFO, method, path, status_code, duration_ms, client_id, "api request completed"),
            400..=499 => event!(Level::WARN, method, path, status_code, duration_ms, client_id, "api request completed"),
            500..=599 => event!(Level::ERROR, method, path, status_code, duration_ms, client_id, "api request completed"),
            _ => event!(Level::DEBUG, method, path, status_code, duration_ms, client_id, "api request completed"),
        }
    }

    /// Log a security-relevant event (auth failure, rate limit, malformed input).
    pub fn log_security_event(event_type: &SecurityEventType, details: &SecurityEventDetails) {
        match event_type {
            SecurityEventType::AuthenticationSuccess => event!(
                Level::INFO,
                event_type = ?event_type,
                client_id = %details.client_id,
                endpoint = %details.endpoint,
                "security event"
            ),
            SecurityEventType::RateLimitExceeded | SecurityEventType::InvalidInput => event!(
                Level::WARN,
                event_type = ?event_type,
                client_id = %details.client_id,
                endpoint = %details.endpoint,
                "security event"
            ),
            SecurityEventType::UnauthorizedAccess | SecurityEventType::SuspiciousActivity => event!(
                Level::ERROR,
                event_type = ?event_type,
                client_id = %details.client_id,
                endpoint = %details.endpoint,
                "security event"
            ),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub enum SecurityEventType {
    AuthenticationSuccess,
    UnauthorizedAccess,
    RateLimitExceeded,
    InvalidInput,
    SuspiciousActivity,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecurityEventDetails {
    pub client_id: String,
    pub endpoint: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub additional_info: HashMap<String, String>,
}
