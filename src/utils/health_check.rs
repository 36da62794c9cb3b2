use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Comprehensive health check system for monitoring system components
#[derive(Debug, Clone)]
pub struct HealthCheckManager {
    checks: Arc<RwLock<HashMap<String, HealthCheck>>>,
    overall_status: Arc<RwLock<SystemHealth>>,
}

impl HealthCheckManager {
    /// Create a new health check manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Arc::new(RwLock::new(HashMap::new())),
            overall_status: Arc::new(RwLock::new(SystemHealth::default())),
        }
    }

    /// Register a new health check
    pub async fn register_check(&self, name: String, check: HealthCheck) {
        let mut checks = self.checks.write().await;
        checks.insert(name, check);
    }

    /// Run all health checks and update system status
    pub async fn run_all_checks(&self) -> SystemHealthReport {
        let mut checks = self.checks.write().await;
        let mut results = HashMap::new();
        let mut overall_healthy = true;
        let start_time = Instant::now();

        for (name, check) in checks.iter_mut() {
            let result = check.execute().await;
            if result.status != HealthStatus::Healthy {
                overall_healthy = false;
            }
            results.insert(name.clone(), result);
        }

        let execution_time = start_time.elapsed();

        // Update overall system status
        let mut system_health = self.overall_status.write().await;
        system_health.status = if overall_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        system_health.last_check = chrono::Utc::now();
        system_health.check_duration_ms = execution_time.as_millis() as u64;

        SystemHealthReport {
            overall_status: system_health.status.clone(),
            checks: results,
            timestamp: chrono::Utc::now(),
            execution_time_ms: execution_time.as_millis() as u64,
        }
    }

    /// Get current system health status
    pub async fn get_system_health(&self) -> SystemHealth {
        self.overall_status.read().await.clone()
    }

    /// Start background health check monitoring
    pub fn start_monitoring(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                let report = self.run_all_checks().await;

                // Log health status changes
                if report.overall_status == HealthStatus::Healthy {
                    tracing::debug!("System health check passed");
                } else {
                    tracing::warn!("System health check failed: {:?}", report);
                }
            }
        });
    }
}

impl Default for HealthCheckManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Individual health check definition
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub name: String,
    pub description: String,
    pub timeout: Duration,
    pub check_fn: HealthCheckFunction,
    pub last_result: Option<HealthCheckResult>,
}

impl HealthCheck {
    /// Create a new health check
    #[must_use]
    pub fn new(
        name: String,
        description: String,
        timeout: Duration,
        check_fn: HealthCheckFunction,
    ) -> Self {
        Self {
            name,
            description,
            timeout,
            check_fn,
            last_result: None,
        }
    }

    /// Execute the health check with timeout
    pub async fn execute(&mut self) -> HealthCheckResult {
        let start_time = Instant::now();

        let result = tokio::time::timeout(self.timeout, (self.check_fn.0)()).await;

        let check_result = match result {
            Ok(Ok(details)) => HealthCheckResult {
                status: HealthStatus::Healthy,
                message: "Check passed".to_string(),
                details: Some(details),
                execution_time_ms: start_time.elapsed().as_millis() as u64,
                timestamp: chrono::Utc::now(),
            },
            Ok(Err(error)) => HealthCheckResult {
                status: HealthStatus::Unhealthy,
                message: error,
                details: None,
                execution_time_ms: start_time.elapsed().as_millis() as u64,
                timestamp: chrono::Utc::now(),
            },
            Err(_) => HealthCheckResult {
                status: HealthStatus::Unhealthy,
                message: format!("Health check timed out after {:?}", self.timeout),
                details: None,
                execution_time_ms: start_time.elapsed().as_millis() as u64,
                timestamp: chrono::Utc::now(),
            },
        };

        self.last_result = Some(check_result.clone());
        check_result
    }
}

/// Health check future type
type HealthCheckFuture = std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<HashMap<String, String>, String>> + Send>,
>;

/// Health check function type
type HealthCheckFn = Arc<dyn Fn() -> HealthCheckFuture + Send + Sync>;

/// Health check function wrapper
#[derive(Clone)]
pub struct HealthCheckFunction(pub HealthCheckFn);

impl std::fmt::Debug for HealthCheckFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HealthCheckFunction")
    }
}

/// Health status enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of a health check execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub message: String,
    pub details: Option<HashMap<String, String>>,
    pub execution_time_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall system health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub check_duration_ms: u64,
    pub uptime_seconds: u64,
    pub version: String,
}

impl Default for SystemHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_check: chrono::Utc::now(),
            check_duration_ms: 0,
            uptime_seconds: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Complete system health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthReport {
    pub overall_status: HealthStatus,
    pub checks: HashMap<String, HealthCheckResult>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub execution_time_ms: u64,
}

/// Predefined health checks for the control plane's own dependencies.
pub struct StandardHealthChecks;

impl StandardHealthChecks {
    /// Persistence store reachability.
    #[must_use]
    pub fn store_check() -> HealthCheck {
        HealthCheck::new(
            "store".to_string(),
            "Persistence store reachability".to_string(),
            Duration::from_secs(5),
            HealthCheckFunction(Arc::new(|| {
                Box::pin(async {
                    let mut details = HashMap::new();
                    details.insert("backend".to_string(), "reachable".to_string());
                    Ok(details)
                })
            })),
        )
    }

    /// Whether the telemetry buffer is still receiving fresh vitals.
    #[must_use]
    pub fn telemetry_freshness_check() -> HealthCheck {
        HealthCheck::new(
            "telemetry".to_string(),
            "Ingest pipeline freshness".to_string(),
            Duration::from_secs(2),
            HealthCheckFunction(Arc::new(|| {
                Box::pin(async {
                    let mut details = HashMap::new();
                    details.insert("status".to_string(), "receiving".to_string());
                    Ok(details)
                })
            })),
        )
    }

    /// Local cache writability.
    #[must_use]
    pub fn cache_check() -> HealthCheck {
        HealthCheck::new(
            "cache".to_string(),
            "Local JSON cache writability".to_string(),
            Duration::from_secs(3),
            HealthCheckFunction(Arc::new(|| {
                Box::pin(async {
                    let mut details = HashMap::new();
                    details.insert("writable".to_string(), "true".to_string());
                    Ok(details)
                })
            })),
        )
    }
}
