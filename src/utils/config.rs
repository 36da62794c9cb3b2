use crate::utils::error::{ImmuneError, ImmuneResult};

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Top-level configuration for the control plane, loaded with precedence
/// file -> `IMMUNE_*` environment overrides -> built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmuneConfig {
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub baseline: BaselineConfig,
    pub sentinel: SentinelConfig,
    pub correlator: CorrelatorConfig,
    pub lifecycle: LifecycleConfig,
    pub healing: HealingConfig,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_connections: usize,
    /// Bearer token guarding ingestion and control endpoints. When unset, resolved at
    /// startup from the `INGEST_API_KEY` env var or the local cache, per the same
    /// precedence the orchestrator used to auto-provision a key.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Bounded in-memory sample count kept per agent before the oldest are dropped.
    pub max_in_memory_samples: usize,
    /// Window used by `get_recent` queries, in seconds.
    pub recent_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// EWMA span (`alpha = 2/(span+1)`).
    pub span: f64,
    /// Minimum samples before a baseline is considered ready for detection.
    pub min_samples: u32,
    /// Samples kept for the bounded p95 estimate.
    pub p95_window: usize,
    /// EWMA span used while a baseline is in its post-heal accelerated window.
    pub fast_span: f64,
    /// How many post-heal updates stay on `fast_span` before reverting to `span`.
    pub adapt_ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Deviation threshold (in effective standard deviations) that trips an anomaly.
    pub deviation_threshold: f64,
    /// `max_deviation` at or above which an agent is force-drained same-tick.
    pub severe_deviation_threshold: f64,
    /// Floor applied to `stddev` before dividing, as a fraction of `|mean|`.
    pub min_relative_stddev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatorConfig {
    pub fleet_wide_fraction: f64,
    pub partial_fleet_fraction: f64,
    pub correlation_window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub suspect_ticks: u32,
    pub drain_timeout_secs: u64,
    pub probation_ticks: u32,
    pub tick_interval_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    pub approval_threshold: f64,
    pub healing_step_delay_secs: f64,
    pub shutdown_drain_timeout_secs: u64,
    /// Require human approval before executing any healing action at or above
    /// `approval_threshold` max_deviation.
    pub require_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub dir: String,
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for ImmuneConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
                cors_origins: vec!["http://localhost:3000".to_string()],
                max_connections: 1000,
                api_key: None,
            },
            telemetry: TelemetryConfig {
                max_in_memory_samples: 500,
                recent_window_secs: 30,
            },
            baseline: BaselineConfig {
                span: 50.0,
                min_samples: 15,
                p95_window: 200,
                fast_span: 10.0,
                adapt_ticks: 50,
            },
            sentinel: SentinelConfig {
                deviation_threshold: 2.5,
                severe_deviation_threshold: 6.0,
                min_relative_stddev: 0.05,
            },
            correlator: CorrelatorConfig {
                fleet_wide_fraction: 0.30,
                partial_fleet_fraction: 0.15,
                correlation_window_secs: 10,
            },
            lifecycle: LifecycleConfig {
                suspect_ticks: 3,
                drain_timeout_secs: 30,
                probation_ticks: 10,
                tick_interval_secs: 1.0,
            },
            healing: HealingConfig {
                approval_threshold: 5.0,
                healing_step_delay_secs: 1.5,
                shutdown_drain_timeout_secs: 120,
                require_approval: true,
            },
            store: StoreConfig {
                backend: StoreBackend::Sqlite,
                sqlite_path: "immune.db".to_string(),
            },
            cache: CacheConfig {
                dir: "~/.immune_cache".to_string(),
                flush_interval_secs: 30,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl ImmuneConfig {
    /// Load configuration with precedence: `IMMUNE_CONFIG_FILE` (or
    /// `config/default.toml` if present) -> `IMMUNE_*` env overrides -> defaults.
    pub fn load() -> ImmuneResult<Self> {
        let mut config = Self::default();

        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            config = Self::from_file(default_path)?;
        }

        if let Ok(path) = env::var("IMMUNE_CONFIG_FILE") {
            if Path::new(&path).exists() {
                config = Self::from_file(&path)?;
            }
        }

        config.load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> ImmuneResult<Self> {
        let content =
            fs::read_to_string(path.as_ref()).map_err(|e| ImmuneError::ConfigurationError {
                reason: format!("failed to read config file: {e}"),
            })?;
        let config: Self =
            toml::from_str(&content).map_err(|e| ImmuneError::ConfigurationError {
                reason: format!("failed to parse config file: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env(&mut self) -> ImmuneResult<()> {
        if let Ok(host) = env::var("IMMUNE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("IMMUNE_PORT") {
            self.server.port = port.parse().map_err(|_| ImmuneError::ConfigurationError {
                reason: format!("invalid port number: {port}"),
            })?;
        }
        if let Ok(key) = env::var("INGEST_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Ok(threshold) = env::var("IMMUNE_DEVIATION_THRESHOLD") {
            self.sentinel.deviation_threshold = threshold.parse().unwrap_or(self.sentinel.deviation_threshold);
        }
        if let Ok(threshold) = env::var("IMMUNE_APPROVAL_THRESHOLD") {
            self.healing.approval_threshold = threshold.parse().unwrap_or(self.healing.approval_threshold);
        }
        if let Ok(require) = env::var("IMMUNE_REQUIRE_APPROVAL") {
            self.healing.require_approval = require.to_lowercase() == "true";
        }
        if let Ok(backend) = env::var("IMMUNE_STORE_BACKEND") {
            self.store.backend = match backend.to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                _ => StoreBackend::Sqlite,
            };
        }
        if let Ok(path) = env::var("IMMUNE_STORE_PATH") {
            self.store.sqlite_path = path;
        }
        if let Ok(dir) = env::var("IMMUNE_CACHE_DIR") {
            self.cache.dir = dir;
        }
        if let Ok(level) = env::var("IMMUNE_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> ImmuneResult<()> {
        if self.server.port == 0 {
            return Err(ImmuneError::ConfigurationError {
                reason: "server port cannot be 0".to_string(),
            });
        }
        if self.baseline.span <= 1.0 {
            return Err(ImmuneError::ConfigurationError {
                reason: "baseline span must be greater than 1".to_string(),
            });
        }
        if self.sentinel.deviation_threshold <= 0.0 {
            return Err(ImmuneError::ConfigurationError {
                reason: "sentinel deviation_threshold must be positive".to_string(),
            });
        }
        if self.correlator.partial_fleet_fraction > self.correlator.fleet_wide_fraction {
            return Err(ImmuneError::ConfigurationError {
                reason: "partial_fleet_fraction must not exceed fleet_wide_fraction".to_string(),
            });
        }
        if self.lifecycle.suspect_ticks == 0 {
            return Err(ImmuneError::ConfigurationError {
                reason: "lifecycle.suspect_ticks must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ImmuneResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ImmuneError::ConfigurationError {
                reason: format!("failed to serialize config: {e}"),
            })?;
        fs::write(path.as_ref(), content).map_err(|e| ImmuneError::ConfigurationError {
            reason: format!("failed to write config file: {e}"),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ImmuneConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_rejected() {
        let mut config = ImmuneConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_fraction_above_fleet_wide_rejected() {
        let mut config = ImmuneConfig::default();
        config.correlator.partial_fleet_fraction = 0.5;
        config.correlator.fleet_wide_fraction = 0.3;
        assert!(config.validate().is_err());
    }
}
