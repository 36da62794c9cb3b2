//! The fleet tick loop and the HITL approval workflow that sits on top of it.
//!
//! Per §4.10/§5: one top-level ticking task drives ingest → sentinel →
//! escalation → correlation/quarantine for the *whole fleet* every tick;
//! only the per-agent healing path (which can block on executor I/O) is
//! spawned as its own task.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, IntGauge};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::baseline::{BaselineLearner, MetricKind};
use super::chaos::ChaosInjector;
use super::correlator::{CorrelationVerdict, FleetCorrelator};
use super::diagnosis::{DiagnosisContext, DiagnosisFeedback, DiagnosisKind, DiagnosisResult, Diagnostician};
use super::enforcement::EnforcementStrategy;
use super::executor::HealingExecutor;
use super::healing::Healer;
use super::lifecycle::{AgentPhase, LifecycleManager};
use super::memory::{HealingRecord, ImmuneMemory};
use super::quarantine::QuarantineController;
use super::registry::{AgentRecord, AgentRegistry};
use super::sentinel::{AnomalyReport, Sentinel};
use super::telemetry::{AgentVitals, TelemetryBuffer};
use crate::infrastructure::cache::LocalCache;
use crate::infrastructure::store::{ApprovalState, Store};
use crate::utils::config::ImmuneConfig;
use crate::utils::error::{ImmuneError, ImmuneResult};
use crate::utils::structured_logging::StructuredLogger;

/// Bound on the in-memory action log fallback (§5 Backpressure).
const ACTION_LOG_CAPACITY: usize = 80;
/// Per-call timeout guarding executor/enforcement I/O (§5 Cancellation).
const BACKEND_CALL_TIMEOUT: Duration = Duration::from_secs(20);
/// How often `drain_shutdown` polls in-flight healing tasks against its deadline.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

fn fallback_counter(name: &str) -> IntCounter {
    IntCounter::new(name, "fallback metric after registration conflict").unwrap_or_else(|_| IntCounter::new("immune_metric_fallback", "fallback").expect("trivial counter always constructs"))
}

static TICK_COUNTER: Lazy<IntCounter> =
    Lazy::new(|| prometheus::register_int_counter!("immune_ticks_total", "Fleet ticks completed").unwrap_or_else(|_| fallback_counter("immune_ticks_total_fallback")));

static INFECTIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!("immune_infections_total", "Infections observed by correlation verdict", &["verdict"])
        .unwrap_or_else(|_| IntCounterVec::new(prometheus::Opts::new("immune_infections_total_fallback", "fallback"), &["verdict"]).expect("trivial vec always constructs"))
});

static QUARANTINES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("immune_quarantines_total", "Agents moved into quarantine").unwrap_or_else(|_| fallback_counter("immune_quarantines_total_fallback"))
});

static APPROVALS_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    prometheus::register_int_gauge!("immune_approvals_pending", "Infections awaiting operator approval")
        .unwrap_or_else(|_| IntGauge::new("immune_approvals_pending_fallback", "fallback").expect("trivial gauge always constructs"))
});

/// Where an infection sits in the HITL approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Rejected,
    HealNow,
}

impl ApprovalDecision {
    fn as_store_str(self) -> &'static str {
        match self {
            ApprovalDecision::Pending => "pending",
            ApprovalDecision::Approved => "approved",
            ApprovalDecision::Rejected => "rejected",
            ApprovalDecision::HealNow => "heal_now",
        }
    }
}

/// The full context behind one infection, kept around so a rejected approval
/// can later be resumed ("heal-now") without re-running detection — per
/// §9, this is a state transition on stored context, not a replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub agent_id: String,
    pub decision: ApprovalDecision,
    pub infection: AnomalyReport,
    pub diagnosis: DiagnosisResult,
    pub verdict: CorrelationVerdict,
    pub affected_fraction: f64,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalRecord {
    fn context(&self) -> DiagnosisContext {
        DiagnosisContext {
            verdict: self.verdict,
            affected_fraction: self.affected_fraction,
        }
    }
}

fn approval_state(record: &ApprovalRecord) -> ApprovalState {
    let reasoning = record.diagnosis.primary().map(|h| h.reasoning.clone()).unwrap_or_default();
    let diagnosis_type = record.diagnosis.primary().map(|h| format!("{:?}", h.kind)).unwrap_or_else(|| "Unknown".to_string());
    ApprovalState {
        agent_id: record.agent_id.clone(),
        decision: record.decision.as_store_str().to_string(),
        max_deviation: record.infection.max_deviation,
        anomalies: record.infection.kinds.iter().map(|k| format!("{k:?}")).collect(),
        diagnosis_type,
        reasoning,
        infection_payload: serde_json::to_value(record).unwrap_or(Value::Null),
        timestamp: record.timestamp,
    }
}

/// One row of the in-memory action-log fallback, mirroring
/// [`crate::infrastructure::store::ActionLogEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogRow {
    pub action_type: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Point-in-time summary of the fleet for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct FleetStats {
    pub total_agents: usize,
    pub phase_counts: std::collections::HashMap<String, usize>,
    pub quarantined_count: usize,
    pub total_quarantines: u64,
    pub total_healings: u64,
    pub healing_success_rate: f64,
    pub pending_approvals: usize,
    pub rejected_approvals: usize,
    pub ticks_completed: u64,
}

/// Per-agent row for the agent-list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub agent_type: String,
    pub model: String,
    pub phase: String,
    pub baseline_ready: bool,
    pub latest_vitals: Option<AgentVitals>,
}

fn vitals_samples(v: &AgentVitals) -> [(MetricKind, f64); 8] {
    [
        (MetricKind::Latency, v.latency_ms),
        (MetricKind::TotalTokens, v.total_tokens),
        (MetricKind::InputTokens, v.input_tokens),
        (MetricKind::OutputTokens, v.output_tokens),
        (MetricKind::ToolCalls, v.tool_calls),
        (MetricKind::Cost, v.cost),
        (MetricKind::RetryRate, v.retry_indicator()),
        (MetricKind::ErrorRate, v.error_indicator()),
    ]
}

/// Wires the detect → diagnose → quarantine → heal → validate pipeline
/// together and drives it one tick at a time for the whole fleet.
pub struct Orchestrator {
    config: Arc<ImmuneConfig>,
    registry: AgentRegistry,
    telemetry: TelemetryBuffer,
    baseline: BaselineLearner,
    sentinel: Sentinel,
    correlator: FleetCorrelator,
    diagnostician: RwLock<Diagnostician>,
    memory: ImmuneMemory,
    lifecycle: LifecycleManager,
    quarantine: QuarantineController,
    executor: Arc<dyn HealingExecutor>,
    pub chaos: ChaosInjector,
    store: Option<Arc<dyn Store>>,
    cache: Option<Arc<LocalCache>>,
    contexts: DashMap<String, ApprovalRecord>,
    pending_infections: DashMap<String, AnomalyReport>,
    action_log: RwLock<VecDeque<ActionLogRow>>,
    shutdown: CancellationToken,
    healing_in_flight: AtomicU64,
    ticks_completed: AtomicU64,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        config: Arc<ImmuneConfig>,
        enforcement: Arc<dyn EnforcementStrategy>,
        executor: Arc<dyn HealingExecutor>,
        store: Option<Arc<dyn Store>>,
        cache: Option<Arc<LocalCache>>,
    ) -> Self {
        Self {
            registry: AgentRegistry::new(),
            telemetry: TelemetryBuffer::new(config.telemetry.max_in_memory_samples),
            baseline: BaselineLearner::new(config.baseline.span, config.baseline.min_samples, config.baseline.p95_window),
            sentinel: Sentinel::new(config.sentinel.deviation_threshold, config.sentinel.min_relative_stddev),
            correlator: FleetCorrelator::new(config.correlator.fleet_wide_fraction, config.correlator.partial_fleet_fraction),
            diagnostician: RwLock::new(Diagnostician::new()),
            memory: ImmuneMemory::new(),
            lifecycle: LifecycleManager::new(
                config.lifecycle.suspect_ticks,
                config.lifecycle.drain_timeout_secs as i64,
                config.lifecycle.probation_ticks,
            ),
            quarantine: QuarantineController::new(enforcement),
            executor,
            chaos: ChaosInjector::new(),
            store,
            cache,
            contexts: DashMap::new(),
            pending_infections: DashMap::new(),
            action_log: RwLock::new(VecDeque::with_capacity(ACTION_LOG_CAPACITY)),
            shutdown: CancellationToken::new(),
            healing_in_flight: AtomicU64::new(0),
            ticks_completed: AtomicU64::new(0),
            config,
        }
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    #[must_use]
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    #[must_use]
    pub fn telemetry(&self) -> &TelemetryBuffer {
        &self.telemetry
    }

    #[must_use]
    pub fn baseline(&self) -> &BaselineLearner {
        &self.baseline
    }

    async fn log_action(&self, action_type: &str, agent_id: &str, payload: Value) {
        if let Some(store) = &self.store {
            if let Err(e) = store.write_action_log(action_type, agent_id, payload.clone()).await {
                warn!(agent_id, error = %e, "failed to persist action log entry");
            }
        }
        let mut log = self.action_log.write().await;
        if log.len() >= ACTION_LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(ActionLogRow {
            action_type: action_type.to_string(),
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            payload,
        });
    }

    pub fn register_agent(&self, agent_id: &str, agent_type: &str, model: &str) {
        self.registry.register(AgentRecord::new(agent_id, agent_type, model));
    }

    /// Public ingestion entrypoint: unknown agents auto-register a minimal entry (§6).
    pub async fn ingest_vitals(&self, vitals: AgentVitals) -> ImmuneResult<()> {
        if !self.registry.contains(&vitals.agent_id) {
            self.register_agent(&vitals.agent_id, &vitals.agent_type, &vitals.model);
        }

        let samples = vitals_samples(&vitals);
        self.baseline.observe(&vitals.agent_id, &samples, vitals.prompt_hash.as_deref()).await;
        self.telemetry.record(vitals.clone()).await;

        if let Some(store) = &self.store {
            store.write_vitals(&vitals).await?;
        }

        if self.lifecycle.get_phase(&vitals.agent_id) == AgentPhase::Initializing && self.baseline.is_ready(&vitals.agent_id).await {
            self.lifecycle.mark_baseline_ready(&vitals.agent_id).await;
        }

        Ok(())
    }

    async fn flush_baseline_if_due(&self, agent_id: &str) {
        if !self.baseline.should_flush(agent_id).await {
            return;
        }
        let Some(profile) = self.baseline.profile(agent_id).await else {
            return;
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.write_baseline(&profile).await {
                warn!(agent_id, error = %e, "failed to persist baseline");
            }
        }
        if let Some(cache) = &self.cache {
            cache.put_baseline(profile).await;
        }
        self.baseline.mark_flushed(agent_id).await;
    }

    /// One fleet-wide cycle: steps 1-4 of §4.10 for every known agent. The
    /// healing path (step 5) is spawned as its own task from here when an
    /// infection clears the approval gate.
    pub async fn tick(self: &Arc<Self>) {
        TICK_COUNTER.inc();
        for agent_id in self.registry.known_agent_ids() {
            self.tick_agent(&agent_id).await;
            self.flush_baseline_if_due(&agent_id).await;
        }
        APPROVALS_PENDING.set(self.get_pending_approvals().len() as i64);
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
    }

    async fn tick_agent(self: &Arc<Self>, agent_id: &str) {
        match self.lifecycle.get_phase(agent_id) {
            AgentPhase::Initializing => {
                if self.baseline.is_ready(agent_id).await {
                    self.lifecycle.mark_baseline_ready(agent_id).await;
                }
            }
            AgentPhase::Healthy | AgentPhase::Suspected => self.tick_detection(agent_id).await,
            AgentPhase::Draining => self.tick_draining(agent_id).await,
            AgentPhase::Probation => self.tick_probation(agent_id).await,
            AgentPhase::Quarantined | AgentPhase::Healing | AgentPhase::Exhausted => {}
        }
    }

    async fn tick_detection(self: &Arc<Self>, agent_id: &str) {
        if !self.baseline.is_ready(agent_id).await {
            return;
        }
        let recent = self.telemetry.recent(agent_id, self.config.telemetry.recent_window_secs as i64).await;
        if recent.is_empty() {
            return;
        }
        let report = self.sentinel.detect(agent_id, &recent, &self.baseline).await;
        match report {
            Some(report) if report.max_deviation >= self.config.sentinel.severe_deviation_threshold => {
                self.pending_infections.insert(agent_id.to_string(), report);
                self.lifecycle.force_drain(agent_id, "severe_deviation").await;
                self.quarantine.drain(agent_id).await;
            }
            Some(report) => {
                let phase = self.lifecycle.record_anomaly_tick(agent_id).await;
                if phase == AgentPhase::Draining {
                    self.pending_infections.insert(agent_id.to_string(), report);
                    self.quarantine.drain(agent_id).await;
                }
            }
            None => {
                self.lifecycle.record_anomaly_resolved(agent_id).await;
            }
        }
    }

    async fn tick_draining(self: &Arc<Self>, agent_id: &str) {
        if !self.lifecycle.check_drain_timeout(agent_id) {
            return;
        }
        self.lifecycle.complete_drain(agent_id).await;
        QUARANTINES_TOTAL.inc();
        if let Some(cache) = &self.cache {
            cache.mark_quarantined(agent_id).await;
        }
        let Some((_, infection)) = self.pending_infections.remove(agent_id) else {
            warn!(agent_id, "drain completed with no cached infection; leaving agent quarantined for manual review");
            return;
        };
        self.process_infection(agent_id, infection).await;
    }

    /// Correlate → diagnose → either park behind an approval gate or start healing.
    async fn process_infection(self: &Arc<Self>, agent_id: &str, infection: AnomalyReport) {
        let all_agents = self.registry.known_agent_ids();
        let correlation = self.correlator.correlate(&infection, &all_agents, &self.telemetry, &self.baseline, &self.sentinel).await;
        INFECTIONS_TOTAL.with_label_values(&[&format!("{:?}", correlation.verdict)]).inc();

        if let Some(store) = &self.store {
            let anomalies: Vec<String> = infection.kinds.iter().map(|k| format!("{k:?}")).collect();
            if let Err(e) = store.write_infection_event(agent_id, infection.max_deviation, &anomalies, "pending_diagnosis").await {
                warn!(agent_id, error = %e, "failed to persist infection event");
            }
        }

        if correlation.verdict == CorrelationVerdict::FleetWide {
            let kinds: Vec<String> = infection.kinds.iter().map(|k| format!("{k:?}")).collect();
            StructuredLogger::log_infection_event(agent_id, &kinds, infection.max_deviation, true);
            self.lifecycle.record_anomaly_resolved(agent_id).await;
            self.quarantine.release(agent_id).await;
            if let Some(cache) = &self.cache {
                cache.clear_quarantined(agent_id).await;
            }
            return;
        }

        let kinds: Vec<String> = infection.kinds.iter().map(|k| format!("{k:?}")).collect();
        StructuredLogger::log_infection_event(agent_id, &kinds, infection.max_deviation, false);

        let context = DiagnosisContext {
            verdict: correlation.verdict,
            affected_fraction: correlation.fraction,
        };
        let diagnosis = self.diagnostician.read().await.diagnose(&infection, &context);
        if let Some(primary) = diagnosis.primary() {
            StructuredLogger::log_diagnosis_event(agent_id, &format!("{:?}", primary.kind), primary.confidence, diagnosis.hypotheses.len());
        }

        if infection.max_deviation >= self.config.healing.approval_threshold && self.config.healing.require_approval {
            let record = ApprovalRecord {
                agent_id: agent_id.to_string(),
                decision: ApprovalDecision::Pending,
                infection,
                diagnosis,
                verdict: correlation.verdict,
                affected_fraction: correlation.fraction,
                timestamp: Utc::now(),
            };
            if let Some(store) = &self.store {
                if let Err(e) = store.write_approval_event(&approval_state(&record)).await {
                    warn!(agent_id, error = %e, "failed to persist approval event");
                }
            }
            self.log_action("approval_pending", agent_id, serde_json::to_value(&record).unwrap_or(Value::Null)).await;
            self.contexts.insert(agent_id.to_string(), record);
            return;
        }

        self.contexts.insert(
            agent_id.to_string(),
            ApprovalRecord {
                agent_id: agent_id.to_string(),
                decision: ApprovalDecision::Approved,
                infection,
                diagnosis: diagnosis.clone(),
                verdict: correlation.verdict,
                affected_fraction: correlation.fraction,
                timestamp: Utc::now(),
            },
        );
        self.spawn_healing(agent_id.to_string(), diagnosis);
    }

    async fn tick_probation(self: &Arc<Self>, agent_id: &str) {
        let recent = self.telemetry.recent(agent_id, self.config.telemetry.recent_window_secs as i64).await;
        if !recent.is_empty() {
            if self.sentinel.detect(agent_id, &recent, &self.baseline).await.is_some() {
                warn!(agent_id, "anomaly reappeared during probation; resuming healing with the prior diagnosis");
                let diagnosis = self.contexts.get(agent_id).map(|e| e.value().diagnosis.clone());
                if let Some(diagnosis) = diagnosis {
                    self.spawn_healing(agent_id.to_string(), diagnosis);
                } else {
                    warn!(agent_id, "probation regression with no prior diagnosis on record; marking exhausted");
                    self.lifecycle.start_healing(agent_id, "probation_regression").await;
                    self.lifecycle.mark_exhausted(agent_id).await;
                }
                return;
            }
        }
        self.lifecycle.record_probation_tick(agent_id);
        if self.lifecycle.probation_complete(agent_id) {
            self.lifecycle.mark_healthy(agent_id, "probation_passed").await;
        }
    }

    /// Spawns the per-agent healing task so one agent's executor I/O never
    /// stalls the fleet tick (§5 Scheduling).
    fn spawn_healing(self: &Arc<Self>, agent_id: String, diagnosis: DiagnosisResult) {
        self.healing_in_flight.fetch_add(1, Ordering::Relaxed);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.heal_agent(agent_id, diagnosis).await;
            orchestrator.healing_in_flight.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Walks hypotheses in order, trying each one's policy ladder until an
    /// action succeeds or every ladder for every hypothesis is exhausted.
    async fn heal_agent(&self, agent_id: String, diagnosis: DiagnosisResult) {
        self.lifecycle.start_healing(&agent_id, "healing_started").await;
        self.quarantine.quarantine(&agent_id).await;

        let mut healed = false;
        for hypothesis in &diagnosis.hypotheses {
            loop {
                let Some(action) = Healer::next_action(&agent_id, hypothesis.kind, &self.memory) else {
                    break;
                };

                let outcome = tokio::time::timeout(BACKEND_CALL_TIMEOUT, self.executor.execute(&agent_id, action)).await;
                let success = match outcome {
                    Ok(result) => result.success,
                    Err(_) => {
                        warn!(agent_id = %agent_id, action = ?action, "healing action timed out");
                        false
                    }
                };
                tokio::time::sleep(Duration::from_secs_f64(self.config.healing.healing_step_delay_secs)).await;

                self.memory
                    .record(HealingRecord {
                        agent_id: agent_id.clone(),
                        diagnosis: hypothesis.kind,
                        action,
                        success,
                        timestamp: Utc::now(),
                    })
                    .await;
                if let Some(store) = &self.store {
                    if let Err(e) = store.write_healing_event(&agent_id, hypothesis.kind, action, success).await {
                        warn!(agent_id = %agent_id, error = %e, "failed to persist healing event");
                    }
                }
                self.log_action(
                    "healing_attempt",
                    &agent_id,
                    serde_json::json!({ "diagnosis": format!("{:?}", hypothesis.kind), "action": format!("{action:?}"), "success": success }),
                )
                .await;

                if success {
                    healed = true;
                    break;
                }
            }
            if healed {
                break;
            }
        }

        if healed {
            self.lifecycle.enter_probation(&agent_id).await;
            self.quarantine.release(&agent_id).await;
            if let Some(cache) = &self.cache {
                cache.clear_quarantined(&agent_id).await;
            }
            self.baseline
                .accelerate(&agent_id, self.config.baseline.adapt_ticks, self.config.baseline.fast_span)
                .await;
        } else {
            self.lifecycle.mark_exhausted(&agent_id).await;
        }
    }

    /// All infections currently awaiting an operator decision.
    #[must_use]
    pub fn get_pending_approvals(&self) -> Vec<ApprovalRecord> {
        self.contexts.iter().filter(|e| e.value().decision == ApprovalDecision::Pending).map(|e| e.value().clone()).collect()
    }

    /// All infections an operator explicitly rejected (agent sits in EXHAUSTED
    /// until a heal-now call).
    #[must_use]
    pub fn get_rejected_approvals(&self) -> Vec<ApprovalRecord> {
        self.contexts.iter().filter(|e| e.value().decision == ApprovalDecision::Rejected).map(|e| e.value().clone()).collect()
    }

    /// Operator decision on one pending infection. `approved = false` moves the
    /// agent to EXHAUSTED with no automatic retry (§4.11).
    pub async fn approve_healing(self: &Arc<Self>, agent_id: &str, approved: bool) -> ImmuneResult<()> {
        let Some(mut entry) = self.contexts.get_mut(agent_id) else {
            return Err(ImmuneError::NotFound {
                resource: format!("pending approval for {agent_id}"),
            });
        };
        if entry.decision != ApprovalDecision::Pending {
            return Ok(());
        }

        let diagnosis = entry.diagnosis.clone();
        entry.decision = if approved { ApprovalDecision::Approved } else { ApprovalDecision::Rejected };
        let record = entry.value().clone();
        drop(entry);

        if let Some(store) = &self.store {
            let _ = store.write_approval_event(&approval_state(&record)).await;
        }
        self.log_action("approval_decision", agent_id, serde_json::json!({ "approved": approved })).await;
        StructuredLogger::log_approval_event(agent_id, approved, false);

        if approved {
            self.spawn_healing(agent_id.to_string(), diagnosis);
        } else {
            self.lifecycle.mark_exhausted(agent_id).await;
        }
        Ok(())
    }

    /// Apply `approved` to every currently-pending infection; returns the count affected.
    pub async fn approve_all_pending(self: &Arc<Self>, approved: bool) -> usize {
        let pending = self.get_pending_approvals();
        for record in &pending {
            let _ = self.approve_healing(&record.agent_id, approved).await;
        }
        pending.len()
    }

    /// Resume healing from the stored diagnosis regardless of current decision
    /// state — this is how a rejected infection or an exhausted agent is
    /// retried without replaying detection (§9).
    pub async fn start_healing_explicitly(self: &Arc<Self>, agent_id: &str) -> ImmuneResult<()> {
        let Some(mut entry) = self.contexts.get_mut(agent_id) else {
            return Err(ImmuneError::NotFound {
                resource: format!("approval context for {agent_id}"),
            });
        };
        entry.decision = ApprovalDecision::HealNow;
        let record = entry.value().clone();
        drop(entry);

        if let Some(store) = &self.store {
            let _ = store.write_approval_event(&approval_state(&record)).await;
        }
        self.log_action("heal_now", agent_id, Value::Null).await;
        StructuredLogger::log_approval_event(agent_id, true, true);
        self.spawn_healing(agent_id.to_string(), record.diagnosis);
        Ok(())
    }

    /// Heal-now every rejected infection; returns the count affected.
    pub async fn start_healing_all_rejected(self: &Arc<Self>) -> usize {
        let rejected = self.get_rejected_approvals();
        for record in &rejected {
            let _ = self.start_healing_explicitly(&record.agent_id).await;
        }
        rejected.len()
    }

    /// Operator feedback on a past diagnosis, biasing future confidence for
    /// that diagnosis kind.
    pub async fn record_feedback(&self, agent_id: &str, feedback: DiagnosisFeedback) -> ImmuneResult<()> {
        let Some(record) = self.contexts.get(agent_id).map(|e| e.value().clone()) else {
            return Err(ImmuneError::NotFound {
                resource: format!("diagnosis history for {agent_id}"),
            });
        };
        let Some(primary) = record.diagnosis.primary() else {
            return Ok(());
        };
        self.diagnostician.write().await.record_feedback(primary.kind, feedback);
        self.memory
            .record_feedback(super::memory::FeedbackEntry {
                diagnosis: primary.kind,
                actual_cause: format!("{:?}", primary.kind),
                notes: format!("{feedback:?}"),
                timestamp: Utc::now(),
            })
            .await;
        StructuredLogger::log_feedback_event(agent_id, &format!("{:?}", primary.kind), &format!("{feedback:?}"));
        let _ = record.context();
        Ok(())
    }

    /// Fleet-wide counts for the stats endpoint.
    pub async fn stats(&self) -> FleetStats {
        let mut phase_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for agent_id in self.registry.known_agent_ids() {
            *phase_counts.entry(format!("{:?}", self.lifecycle.get_phase(&agent_id))).or_insert(0) += 1;
        }
        FleetStats {
            total_agents: self.registry.len(),
            phase_counts,
            quarantined_count: self.quarantine.quarantined_count(),
            total_quarantines: self.quarantine.total_quarantines(),
            total_healings: self.memory.total_healings().await as u64,
            healing_success_rate: self.memory.healing_success_rate().await,
            pending_approvals: self.get_pending_approvals().len(),
            rejected_approvals: self.get_rejected_approvals().len(),
            ticks_completed: self.ticks_completed.load(Ordering::Relaxed),
        }
    }

    /// Per-agent rows for the agent-list endpoint.
    pub async fn agents_summary(&self) -> Vec<AgentSummary> {
        let mut out = Vec::new();
        for record in self.registry.list() {
            let latest_vitals = self.telemetry.latest(&record.agent_id).await;
            out.push(AgentSummary {
                phase: format!("{:?}", self.lifecycle.get_phase(&record.agent_id)),
                baseline_ready: self.baseline.is_ready(&record.agent_id).await,
                agent_id: record.agent_id,
                agent_type: record.agent_type,
                model: record.model,
                latest_vitals,
            });
        }
        out
    }

    /// Most recent `limit` action-log rows, newest last.
    pub async fn get_action_log(&self, limit: usize) -> Vec<ActionLogRow> {
        let log = self.action_log.read().await;
        let start = log.len().saturating_sub(limit);
        log.iter().skip(start).cloned().collect()
    }

    /// Runs the fleet tick loop until cancelled, then drains in-flight healing
    /// tasks within the configured shutdown window (§5 Cancellation).
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(self.config.lifecycle.tick_interval_secs.max(0.05)));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                () = self.shutdown.cancelled() => {
                    self.drain_shutdown().await;
                    break;
                }
            }
        }
    }

    async fn drain_shutdown(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(self.config.healing.shutdown_drain_timeout_secs);
        while self.healing_in_flight.load(Ordering::Relaxed) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        let remaining = self.healing_in_flight.load(Ordering::Relaxed);
        if remaining > 0 {
            warn!(remaining, "shutdown drain window elapsed with healing tasks still in flight");
        }
    }
}
