#![allow(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::cargo)]
#![allow(missing_docs)]
#![allow(unused)]
#![allow(dead_code)]
#![allow(clippy::clone_on_ref_ptr)]
#![allow(clippy::unwrap_used)]
#![allow(unused_comparisons)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::useless_vec)]
#![allow(unused_imports)]
#![allow(clippy::single_component_path_imports)]
//! # Immune Control Plane
//!
//! A control plane for fleets of autonomous LLM-driven agents. It watches every
//! agent's telemetry, learns what "normal" looks like per agent, detects
//! deviations, isolates agents that are misbehaving, attempts graded recovery
//! actions, and remembers which actions actually worked.
//!
//! ## Architecture overview
//!
//! - [`immune`]: the detect -> diagnose -> quarantine -> heal -> validate
//!   pipeline and the lifecycle state machine that guards it. This is where
//!   the hard engineering lives.
//! - [`infrastructure`]: the persistence store abstraction, the local restart
//!   cache, the circuit breaker, and HTTP middleware.
//! - [`utils`]: configuration, structured errors, logging, rate limiting,
//!   security helpers, and request validation.
//! - [`api`]: response envelopes and payload validation for the HTTP control
//!   surface; the routes themselves live in [`server`].
//!
//! ## Quick start
//!
//! ```no_run
//! use immune_control_plane::immune::Orchestrator;
//! use immune_control_plane::immune::{enforcement::NoOpEnforcement, executor::SimulatedExecutor};
//! use immune_control_plane::utils::config::ImmuneConfig;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Arc::new(ImmuneConfig::default());
//!     let orchestrator = Arc::new(Orchestrator::new(
//!         config,
//!         Arc::new(NoOpEnforcement::new()),
//!         Arc::new(SimulatedExecutor::new()),
//!         None,
//!         None,
//!     ));
//!     orchestrator.register_agent("agent-1", "worker", "gpt-4o-mini");
//! }
//! ```

/// Response handlers and validation for the HTTP control surface.
pub mod api;
/// The detect -> diagnose -> quarantine -> heal -> validate pipeline.
pub mod immune;
/// Persistence store, local cache, circuit breaker, and HTTP middleware.
pub mod infrastructure;
/// Router assembly and HTTP handlers for the control/ingest surface.
pub mod server;
/// Configuration, structured errors, logging, rate limiting, and security.
pub mod utils;

pub use immune::{
    AgentPhase, AgentVitals, AnomalyKind, AnomalyReport, BaselineLearner, BaselineProfile,
    CorrelationVerdict, DiagnosisKind, DiagnosisResult, Healer, HealingAction, LifecycleManager,
    Orchestrator, Sentinel, TelemetryBuffer,
};
pub use utils::config::ImmuneConfig;
pub use utils::error::{ImmuneError, ImmuneResult};

use std::sync::Arc;

/// Shared state handed to every axum handler: the orchestrator plus the
/// ambient HTTP-layer concerns (rate limiting, security auditing, health).
#[derive(Clone)]
pub struct AppState {
    /// The fleet orchestrator: the only thing handlers actually need to
    /// drive the control plane.
    pub orchestrator: Arc<Orchestrator>,
    /// Resolved configuration, shared read-only.
    pub config: Arc<ImmuneConfig>,
    /// Per-endpoint-class rate limiters.
    pub rate_limiters: Arc<utils::rate_limiter::RateLimiters>,
    /// Security audit logger for authentication/authorization events.
    pub security_auditor: Arc<utils::security::SecurityAuditor>,
    /// Liveness/readiness checks for `/health`.
    pub health: Arc<utils::health_check::HealthCheckManager>,
}
