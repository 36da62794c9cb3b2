use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for the immune control plane.
///
/// Every variant carries enough structured detail to log, to translate into
/// an HTTP response, and to decide whether the operation can be retried.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ImmuneError {
    /// An operation referenced an agent the registry doesn't know about.
    #[error("Agent not found: {id}")]
    AgentNotFound { id: String },

    /// A lifecycle transition was rejected because it isn't in the phase's
    /// allow-table; state is left unchanged.
    #[error("Lifecycle transition rejected for {agent_id}: {from} -> {to} ({reason})")]
    LifecycleTransitionRejected {
        agent_id: String,
        from: String,
        to: String,
        reason: String,
    },

    /// A healing executor or enforcement backend reported failure applying
    /// an action; the caller records it in memory and tries the next action.
    #[error("Executor '{executor}' failed action {action} for {agent_id}: {reason}")]
    ExecutorFailed {
        agent_id: String,
        action: String,
        executor: String,
        reason: String,
    },

    /// An enforcement call (block/drain/unblock) did not succeed.
    #[error("Enforcement action failed for {agent_id}: {reason}")]
    EnforcementFailed { agent_id: String, reason: String },

    #[error("Resource exhausted: {resource}")]
    ResourceExhausted { resource: String },

    #[error("System overloaded: {reason}")]
    SystemOverloaded { reason: String },

    #[error("Configuration error: {reason}")]
    ConfigurationError { reason: String },

    #[error("Configuration file not found: {path}")]
    ConfigurationFileNotFound { path: String },

    /// A persistence (store) operation failed; per spec this is treated as
    /// transient and the caller should retry on the next tick rather than
    /// tear down the pipeline.
    #[error("Store operation '{operation}' failed: {reason}")]
    StoreError { operation: String, reason: String },

    /// Local JSON cache read/write/flush failure.
    #[error("Cache error ({operation}): {reason}")]
    CacheError { operation: String, reason: String },

    /// The local cache file carried a schema version this build can't read;
    /// per spec, discard it and start fresh rather than crash.
    #[error("Cache schema version mismatch: found {found}, expected {expected}")]
    CacheSchemaMismatch { found: u32, expected: u32 },

    #[error("Circuit breaker open: {reason}")]
    CircuitBreakerOpen { reason: String },

    #[error("Circuit breaker configuration invalid for {field}: {reason}")]
    CircuitBreakerConfigInvalid { field: String, reason: String },

    #[error("Authentication error: {reason}")]
    AuthenticationError { reason: String },

    #[error("Authorization error: {reason}")]
    AuthorizationError { reason: String },

    #[error("Security error: {reason}")]
    SecurityError { reason: String },

    #[error("Rate limit exceeded for {client_id}: {limit} requests per {window_secs}s")]
    RateLimitExceeded {
        client_id: String,
        limit: u32,
        window_secs: u64,
    },

    #[error("Permission denied for {action} on {resource}")]
    PermissionDenied { resource: String, action: String },

    #[error("IO error: {reason}")]
    IoError { reason: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Network error during {operation}: {reason}")]
    NetworkError { operation: String, reason: String },

    #[error("Validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Invalid JSON at {json_path}: {reason}")]
    InvalidJson { json_path: String, reason: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Timeout: {reason}")]
    Timeout { reason: String },

    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    TimeoutError { operation: String, duration_ms: u64 },

    #[error("Operation failed: {reason}")]
    OperationFailed { reason: String },

    #[error("Operation cancelled: {operation}")]
    OperationCancelled { operation: String },

    #[error("Operation not supported: {operation}")]
    OperationNotSupported { operation: String },

    #[error("Health check failed for {component}: {status}")]
    HealthCheckFailed { component: String, status: String },

    #[error("Graceful shutdown of {component} timed out after {timeout_ms}ms")]
    GracefulShutdownTimeout { component: String, timeout_ms: u64 },
}

impl From<std::time::SystemTimeError> for ImmuneError {
    fn from(error: std::time::SystemTimeError) -> Self {
        ImmuneError::ValidationError {
            field: "timestamp".to_string(),
            reason: format!("System time conversion failed: {error}"),
        }
    }
}

// Note: anyhow already provides a blanket implementation for std::error::Error

/// Result type alias for the immune control plane.
pub type ImmuneResult<T> = Result<T, ImmuneError>;

/// Error context for better debugging and observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// The operation that was being performed when the error occurred.
    pub operation: String,
    /// The component/module where the error originated.
    pub component: String,
    /// When the error occurred.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Additional contextual information.
    pub additional_info: std::collections::HashMap<String, String>,
    /// Request ID for tracing (if applicable).
    pub request_id: Option<String>,
    /// User ID for user-specific errors (if applicable).
    pub user_id: Option<String>,
}

impl ErrorContext {
    /// Create a new error context.
    #[must_use]
    pub fn new(operation: &str, component: &str) -> Self {
        Self {
            operation: operation.to_string(),
            component: component.to_string(),
            timestamp: chrono::Utc::now(),
            additional_info: std::collections::HashMap::new(),
            request_id: None,
            user_id: None,
        }
    }

    /// Add additional information to the error context.
    #[must_use]
    pub fn with_info(mut self, key: &str, value: &str) -> Self {
        self.additional_info
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Add request ID for tracing.
    #[must_use]
    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add user ID for user-specific errors.
    #[must_use]
    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Helper macro for creating errors with context.
#[macro_export]
macro_rules! immune_error {
    ($error_type:ident, $($field:ident: $value:expr),*) => {
        ImmuneError::$error_type {
            $($field: $value.to_string()),*
        }
    };
}

/// Converts an anyhow error into an [`ImmuneError`], tagging it with the
/// operation that was in flight when it occurred.
#[must_use]
pub fn anyhow_to_immune_error(err: &anyhow::Error, operation: &str) -> ImmuneError {
    ImmuneError::OperationFailed {
        reason: format!("{operation} failed: {err}"),
    }
}

/// Helper trait for adding context to Results.
pub trait ResultExt<T> {
    fn with_context(self, operation: &str, component: &str) -> Result<T, ImmuneError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_context(self, operation: &str, component: &str) -> Result<T, ImmuneError> {
        self.map_err(|e| ImmuneError::OperationFailed {
            reason: format!("{operation} in {component}: {e}"),
        })
    }
}

impl From<std::io::Error> for ImmuneError {
    fn from(err: std::io::Error) -> Self {
        ImmuneError::IoError {
            reason: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ImmuneError {
    fn from(err: anyhow::Error) -> Self {
        ImmuneError::OperationFailed {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ImmuneError {
    fn from(err: serde_json::Error) -> Self {
        ImmuneError::InvalidJson {
            json_path: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_context_builder_chains() {
        let ctx = ErrorContext::new("ingest", "telemetry")
            .with_info("agent_id", "a1")
            .with_request_id("req-1".to_string());
        assert_eq!(ctx.operation, "ingest");
        assert_eq!(ctx.additional_info.get("agent_id").unwrap(), "a1");
        assert_eq!(ctx.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn result_ext_wraps_display_error() {
        let result: Result<(), &str> = Err("boom");
        let wrapped = result.with_context("do thing", "store");
        assert!(matches!(wrapped, Err(ImmuneError::OperationFailed { .. })));
    }

    #[test]
    fn anyhow_conversion_preserves_operation() {
        let err = anyhow::anyhow!("disk full");
        let converted = anyhow_to_immune_error(&err, "cache flush");
        match converted {
            ImmuneError::OperationFailed { reason } => {
                assert!(reason.contains("cache flush"));
                assert!(reason.contains("disk full"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
