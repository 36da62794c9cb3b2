//! Agent lifecycle: the 8-state machine that governs whether an agent may
//! execute, is under observation, or has been isolated for healing.
//!
//! ```text
//! INITIALIZING  registered, learning baseline. no detection runs.
//! HEALTHY       normal operation, full access.
//! SUSPECTED     anomaly detected, under observation for `suspect_ticks`.
//! DRAINING      quarantine ordered; new requests blocked, in-flight may finish.
//! QUARANTINED   fully isolated; all execution blocked.
//! HEALING       active healing in progress; execution blocked.
//! PROBATION     healed, under observation; execution allowed, fresh vitals collected.
//! EXHAUSTED     all healing actions failed; execution blocked, manual intervention required.
//! ```
//! Every transition is guarded against the allow-table below and recorded so
//! the full history can be reconstructed.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::utils::structured_logging::StructuredLogger;

pub const DEFAULT_SUSPECT_TICKS: u32 = 3;
pub const DEFAULT_DRAIN_TIMEOUT_SECONDS: i64 = 30;
pub const DEFAULT_PROBATION_TICKS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentPhase {
    Initializing,
    Healthy,
    Suspected,
    Draining,
    Quarantined,
    Healing,
    Probation,
    Exhausted,
}

fn allowed_targets(phase: AgentPhase) -> &'static [AgentPhase] {
    use AgentPhase::{Draining, Exhausted, Healing, Healthy, Initializing, Probation, Quarantined, Suspected};
    match phase {
        Initializing => &[Healthy],
        Healthy => &[Suspected, Draining],
        Suspected => &[Healthy, Draining],
        Draining => &[Quarantined],
        Quarantined => &[Healing],
        Healing => &[Probation, Exhausted],
        Probation => &[Healthy, Healing],
        Exhausted => &[Healing],
    }
}

/// Immutable record of one lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub agent_id: String,
    pub from_phase: AgentPhase,
    pub to_phase: AgentPhase,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

struct AgentLifecycleState {
    phase: AgentPhase,
    suspect_tick_count: u32,
    drain_started_at: Option<DateTime<Utc>>,
    probation_tick_count: u32,
}

impl Default for AgentLifecycleState {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Initializing,
            suspect_tick_count: 0,
            drain_started_at: None,
            probation_tick_count: 0,
        }
    }
}

/// Manages the lifecycle phase of every known agent.
pub struct LifecycleManager {
    suspect_ticks: u32,
    drain_timeout_seconds: i64,
    probation_ticks: u32,
    states: DashMap<String, AgentLifecycleState>,
    history: RwLock<Vec<TransitionEvent>>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(suspect_ticks: u32, drain_timeout_seconds: i64, probation_ticks: u32) -> Self {
        Self {
            suspect_ticks,
            drain_timeout_seconds,
            probation_ticks,
            states: DashMap::new(),
            history: RwLock::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn get_phase(&self, agent_id: &str) -> AgentPhase {
        self.states.entry(agent_id.to_string()).or_default().phase
    }

    /// Attempt a transition; returns `false` if the target phase isn't reachable
    /// from the agent's current phase.
    pub async fn transition(&self, agent_id: &str, target: AgentPhase, reason: &str) -> bool {
        let from_phase = {
            let state = self.states.entry(agent_id.to_string()).or_default();
            state.phase
        };

        if !allowed_targets(from_phase).contains(&target) {
            StructuredLogger::log_lifecycle_event(agent_id, &format!("{from_phase:?}"), &format!("{target:?}"), reason, false);
            return false;
        }

        let timestamp = Utc::now();
        {
            let mut state = self.states.entry(agent_id.to_string()).or_default();
            state.phase = target;
            match target {
                AgentPhase::Suspected => state.suspect_tick_count = 1,
                AgentPhase::Draining => state.drain_started_at = Some(timestamp),
                AgentPhase::Probation => state.probation_tick_count = 0,
                _ => {}
            }
        }

        let event = TransitionEvent {
            agent_id: agent_id.to_string(),
            from_phase,
            to_phase: target,
            reason: reason.to_string(),
            timestamp,
        };
        StructuredLogger::log_lifecycle_event(agent_id, &format!("{from_phase:?}"), &format!("{target:?}"), reason, true);
        self.history.write().await.push(event);
        true
    }

    pub async fn mark_baseline_ready(&self, agent_id: &str) -> bool {
        self.transition(agent_id, AgentPhase::Healthy, "baseline_ready").await
    }

    /// Call each tick an anomaly is detected. Returns the phase after the call;
    /// may remain SUSPECTED or escalate to DRAINING once `suspect_ticks` is reached.
    pub async fn record_anomaly_tick(&self, agent_id: &str) -> AgentPhase {
        let phase = self.get_phase(agent_id);
        match phase {
            AgentPhase::Healthy => {
                self.transition(agent_id, AgentPhase::Suspected, "anomaly_detected").await;
            }
            AgentPhase::Suspected => {
                let escalate = {
                    let mut state = self.states.entry(agent_id.to_string()).or_default();
                    state.suspect_tick_count += 1;
                    state.suspect_tick_count >= self.suspect_ticks
                };
                if escalate {
                    self.transition(agent_id, AgentPhase::Draining, "anomaly_persisted").await;
                }
            }
            _ => {}
        }
        self.get_phase(agent_id)
    }

    /// Call when a SUSPECTED agent shows no anomaly on a tick.
    pub async fn record_anomaly_resolved(&self, agent_id: &str) -> bool {
        if self.get_phase(agent_id) == AgentPhase::Suspected {
            self.transition(agent_id, AgentPhase::Healthy, "anomaly_resolved").await
        } else {
            false
        }
    }

    /// Skip SUSPECTED and go straight to DRAINING, for severe anomalies.
    pub async fn force_drain(&self, agent_id: &str, reason: &str) -> bool {
        let phase = self.get_phase(agent_id);
        if phase == AgentPhase::Healthy {
            self.transition(agent_id, AgentPhase::Suspected, reason).await;
        }
        if matches!(phase, AgentPhase::Healthy | AgentPhase::Suspected) {
            self.transition(agent_id, AgentPhase::Draining, reason).await
        } else {
            false
        }
    }

    #[must_use]
    pub fn check_drain_timeout(&self, agent_id: &str) -> bool {
        let Some(state) = self.states.get(agent_id) else {
            return false;
        };
        if state.phase != AgentPhase::Draining {
            return false;
        }
        let Some(started) = state.drain_started_at else {
            return false;
        };
        (Utc::now() - started).num_seconds() >= self.drain_timeout_seconds
    }

    pub async fn complete_drain(&self, agent_id: &str) -> bool {
        self.transition(agent_id, AgentPhase::Quarantined, "drain_complete").await
    }

    pub async fn start_healing(&self, agent_id: &str, reason: &str) -> bool {
        self.transition(agent_id, AgentPhase::Healing, reason).await
    }

    pub async fn enter_probation(&self, agent_id: &str) -> bool {
        self.transition(agent_id, AgentPhase::Probation, "healing_action_applied").await
    }

    /// Increment the probation tick counter and return the new count.
    pub fn record_probation_tick(&self, agent_id: &str) -> u32 {
        let mut state = self.states.entry(agent_id.to_string()).or_default();
        if state.phase == AgentPhase::Probation {
            state.probation_tick_count += 1;
        }
        state.probation_tick_count
    }

    #[must_use]
    pub fn probation_complete(&self, agent_id: &str) -> bool {
        let Some(state) = self.states.get(agent_id) else {
            return false;
        };
        state.phase == AgentPhase::Probation && state.probation_tick_count >= self.probation_ticks
    }

    pub async fn mark_healthy(&self, agent_id: &str, reason: &str) -> bool {
        self.transition(agent_id, AgentPhase::Healthy, reason).await
    }

    pub async fn mark_exhausted(&self, agent_id: &str) -> bool {
        self.transition(agent_id, AgentPhase::Exhausted, "all_actions_exhausted").await
    }

    /// Whether the agent should be permitted to execute / receive requests.
    #[must_use]
    pub fn is_execution_allowed(&self, agent_id: &str) -> bool {
        matches!(
            self.get_phase(agent_id),
            AgentPhase::Initializing | AgentPhase::Healthy | AgentPhase::Suspected | AgentPhase::Probation
        )
    }

    #[must_use]
    pub fn is_blocked(&self, agent_id: &str) -> bool {
        !self.is_execution_allowed(agent_id)
    }

    pub async fn history(&self, agent_id: Option<&str>) -> Vec<TransitionEvent> {
        let history = self.history.read().await;
        match agent_id {
            Some(id) => history.iter().filter(|e| e.agent_id == id).cloned().collect(),
            None => history.clone(),
        }
    }

    pub fn reset(&self, agent_id: &str) {
        self.states.remove(agent_id);
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new(DEFAULT_SUSPECT_TICKS, DEFAULT_DRAIN_TIMEOUT_SECONDS, DEFAULT_PROBATION_TICKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn baseline_ready_moves_initializing_to_healthy() {
        let manager = LifecycleManager::default();
        assert!(manager.mark_baseline_ready("a1").await);
        assert_eq!(manager.get_phase("a1"), AgentPhase::Healthy);
    }

    #[tokio::test]
    async fn disallowed_transition_is_blocked_and_logged() {
        let manager = LifecycleManager::default();
        assert!(!manager.transition("a1", AgentPhase::Healing, "bad").await);
        assert_eq!(manager.get_phase("a1"), AgentPhase::Initializing);
    }

    #[tokio::test]
    async fn sustained_anomaly_escalates_to_draining() {
        let manager = LifecycleManager::new(3, 30, 10);
        manager.mark_baseline_ready("a1").await;
        manager.record_anomaly_tick("a1").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Suspected);
        manager.record_anomaly_tick("a1").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Suspected);
        manager.record_anomaly_tick("a1").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Draining);
    }

    #[tokio::test]
    async fn single_tick_anomaly_resolves_back_to_healthy() {
        let manager = LifecycleManager::default();
        manager.mark_baseline_ready("a1").await;
        manager.record_anomaly_tick("a1").await;
        assert!(manager.record_anomaly_resolved("a1").await);
        assert_eq!(manager.get_phase("a1"), AgentPhase::Healthy);
    }

    #[tokio::test]
    async fn force_drain_skips_suspected_from_healthy() {
        let manager = LifecycleManager::default();
        manager.mark_baseline_ready("a1").await;
        assert!(manager.force_drain("a1", "severe_anomaly").await);
        assert_eq!(manager.get_phase("a1"), AgentPhase::Draining);
    }

    #[tokio::test]
    async fn full_cycle_through_healing_and_probation() {
        let manager = LifecycleManager::new(3, 30, 2);
        manager.mark_baseline_ready("a1").await;
        manager.force_drain("a1", "severe").await;
        manager.complete_drain("a1").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Quarantined);
        manager.start_healing("a1", "healing_started").await;
        manager.enter_probation("a1").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Probation);
        manager.record_probation_tick("a1");
        assert!(!manager.probation_complete("a1"));
        manager.record_probation_tick("a1");
        assert!(manager.probation_complete("a1"));
        manager.mark_healthy("a1", "probation_passed").await;
        assert_eq!(manager.get_phase("a1"), AgentPhase::Healthy);
    }

    #[tokio::test]
    async fn exhausted_after_healing_failure_blocks_execution() {
        let manager = LifecycleManager::default();
        manager.mark_baseline_ready("a1").await;
        manager.force_drain("a1", "severe").await;
        manager.complete_drain("a1").await;
        manager.start_healing("a1", "healing_started").await;
        manager.mark_exhausted("a1").await;
        assert!(manager.is_blocked("a1"));
    }

    #[tokio::test]
    async fn history_filters_by_agent() {
        let manager = LifecycleManager::default();
        manager.mark_baseline_ready("a1").await;
        manager.mark_baseline_ready("a2").await;
        assert_eq!(manager.history(Some("a1")).await.len(), 1);
        assert_eq!(manager.history(None).await.len(), 2);
    }

    #[tokio::test]
    async fn reset_clears_state() {
        let manager = LifecycleManager::default();
        manager.mark_baseline_ready("a1").await;
        manager.reset("a1");
        assert_eq!(manager.get_phase("a1"), AgentPhase::Initializing);
    }
}
