//! The detect -> diagnose -> quarantine -> heal -> validate pipeline for an
//! agent fleet, and the state machines that support it.
//!
//! Modules are ordered leaves-first: telemetry and baseline have no
//! dependencies on the rest of the pipeline; the orchestrator at the bottom
//! wires everything together.

pub mod telemetry;
pub mod baseline;
pub mod sentinel;
pub mod correlator;
pub mod diagnosis;
pub mod memory;
pub mod healing;
pub mod enforcement;
pub mod executor;
pub mod quarantine;
pub mod lifecycle;
pub mod registry;
pub mod chaos;
pub mod orchestrator;

pub use telemetry::{AgentVitals, TelemetryBuffer};
pub use baseline::{BaselineLearner, BaselineProfile};
pub use sentinel::{AnomalyKind, AnomalyReport, Sentinel};
pub use correlator::{CorrelationResult, CorrelationVerdict, FleetCorrelator};
pub use diagnosis::{Diagnostician, DiagnosisContext, DiagnosisFeedback, DiagnosisKind, DiagnosisResult, Hypothesis};
pub use memory::{HealingRecord, ImmuneMemory};
pub use healing::{Healer, HealingAction};
pub use enforcement::{EnforcementAction, EnforcementResult, EnforcementStrategy};
pub use executor::{ExecutionResult, HealingExecutor};
pub use quarantine::QuarantineController;
pub use lifecycle::{AgentPhase, LifecycleManager, TransitionEvent};
pub use registry::{AgentRecord, AgentRegistry};
pub use chaos::ChaosInjector;
pub use orchestrator::{ApprovalDecision, ApprovalRecord, Orchestrator};
