//! End-to-end detect -> diagnose -> quarantine -> heal -> validate scenarios,
//! driven through the orchestrator the way the tick loop and HTTP handlers
//! would, with a `MemoryStore`/`SimulatedExecutor` fleet for determinism.
//!
//! The sentinel averages the 5 most-recently ingested samples per tick, so
//! each "tick" below floods that window with 5 identical vitals before
//! calling `tick()` — this keeps each tick's deviation independent of
//! whatever came before it instead of being diluted by history.

use std::sync::Arc;
use std::time::Duration;

use immune_control_plane::immune::enforcement::NoOpEnforcement;
use immune_control_plane::immune::executor::SimulatedExecutor;
use immune_control_plane::immune::{AgentPhase, AgentVitals, Orchestrator};
use immune_control_plane::utils::config::ImmuneConfig;

const WINDOW: usize = 5;

fn fast_config() -> ImmuneConfig {
    let mut config = ImmuneConfig::default();
    config.baseline.min_samples = 5;
    config.lifecycle.suspect_ticks = 3;
    config.lifecycle.drain_timeout_secs = 0;
    config.lifecycle.probation_ticks = 2;
    config.healing.require_approval = false;
    config.healing.healing_step_delay_secs = 0.0;
    config
}

fn orchestrator(config: ImmuneConfig) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(config),
        Arc::new(NoOpEnforcement::new()),
        Arc::new(SimulatedExecutor::new()),
        None,
        None,
    ))
}

fn vitals(agent_id: &str, tool_calls: f64) -> AgentVitals {
    AgentVitals {
        agent_id: agent_id.to_string(),
        timestamp: chrono::Utc::now(),
        agent_type: "worker".to_string(),
        latency_ms: 300.0,
        total_tokens: 1200.0,
        input_tokens: 800.0,
        output_tokens: 400.0,
        tool_calls,
        retries: 0.0,
        success: true,
        cost: 0.006,
        model: "GPT-4o".to_string(),
        error_category: None,
        prompt_hash: Some("stable-hash".to_string()),
    }
}

/// Floods the sentinel's 5-sample window with `tool_calls` then ticks once.
async fn tick_with(orchestrator: &Arc<Orchestrator>, agent_id: &str, tool_calls: f64) {
    for _ in 0..WINDOW {
        orchestrator.ingest_vitals(vitals(agent_id, tool_calls)).await.unwrap();
    }
    orchestrator.tick().await;
}

async fn warm_up(orchestrator: &Arc<Orchestrator>, agent_id: &str) {
    tick_with(orchestrator, agent_id, 3.0).await;
}

async fn wait_for_phase(orchestrator: &Arc<Orchestrator>, agent_id: &str, phase: AgentPhase) {
    for _ in 0..50 {
        if orchestrator.lifecycle().get_phase(agent_id) == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(orchestrator.lifecycle().get_phase(agent_id), phase, "agent never reached expected phase");
}

/// Scenario 4 (spec §8): three consecutive anomalous ticks escalate a
/// HEALTHY agent to SUSPECTED then DRAINING; a clean tick in between resets
/// the counter instead of accumulating toward escalation.
#[tokio::test]
async fn suspect_escalation_resets_on_clean_tick() {
    let orchestrator = orchestrator(fast_config());
    orchestrator.register_agent("agent-1", "worker", "GPT-4o");
    warm_up(&orchestrator, "agent-1").await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Healthy);

    // ~4 sigma deviation: well above the 2.5 detection threshold, safely
    // below the 6.0 severe/force-drain threshold.
    tick_with(&orchestrator, "agent-1", 3.6).await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Suspected);

    tick_with(&orchestrator, "agent-1", 3.6).await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Suspected);

    // A clean tick resolves SUSPECTED back to HEALTHY instead of letting the
    // anomaly count carry forward toward DRAINING.
    tick_with(&orchestrator, "agent-1", 3.0).await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Healthy);

    // Now three in a row do escalate all the way to DRAINING.
    tick_with(&orchestrator, "agent-1", 3.6).await;
    tick_with(&orchestrator, "agent-1", 3.6).await;
    tick_with(&orchestrator, "agent-1", 3.6).await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Draining);
}

/// Scenario 6 (spec §8): a moderate, persistent tool-call anomaly escalates
/// to DRAINING, quarantine completes, a policy-driven heal succeeds against
/// the always-succeeding simulated executor, and the agent lands in
/// PROBATION with a recorded success in immune memory.
#[tokio::test]
async fn tool_explosion_drains_quarantines_and_heals() {
    let orchestrator = orchestrator(fast_config());
    orchestrator.register_agent("agent-1", "worker", "GPT-4o");
    warm_up(&orchestrator, "agent-1").await;

    for _ in 0..3 {
        tick_with(&orchestrator, "agent-1", 3.6).await;
    }
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Draining);

    // drain_timeout_secs is 0, so the very next tick completes the drain,
    // diagnoses, and (with require_approval = false) starts healing.
    orchestrator.tick().await;
    wait_for_phase(&orchestrator, "agent-1", AgentPhase::Probation).await;

    let stats = orchestrator.stats().await;
    assert_eq!(stats.total_healings, 1);
    assert!(stats.healing_success_rate > 0.0);
    assert_eq!(stats.quarantined_count, 0);
    assert_eq!(stats.total_quarantines, 1);
}

/// Probation runs for `probation_ticks` clean ticks and then returns the
/// agent to HEALTHY.
#[tokio::test]
async fn probation_completes_back_to_healthy() {
    let orchestrator = orchestrator(fast_config());
    orchestrator.register_agent("agent-1", "worker", "GPT-4o");
    warm_up(&orchestrator, "agent-1").await;

    for _ in 0..3 {
        tick_with(&orchestrator, "agent-1", 3.6).await;
    }
    orchestrator.tick().await;
    wait_for_phase(&orchestrator, "agent-1", AgentPhase::Probation).await;

    for _ in 0..3 {
        tick_with(&orchestrator, "agent-1", 3.0).await;
    }
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Healthy);
}

/// An unknown agent's first `ingest_vitals` auto-registers it (§6).
#[tokio::test]
async fn ingest_auto_registers_unknown_agent() {
    let orchestrator = orchestrator(fast_config());
    assert!(orchestrator.registry().get("new-agent").is_none());
    orchestrator.ingest_vitals(vitals("new-agent", 3.0)).await.unwrap();
    assert!(orchestrator.registry().get("new-agent").is_some());
}

/// A severe deviation skips SUSPECTED and force-drains the agent same tick.
#[tokio::test]
async fn severe_deviation_force_drains_immediately() {
    let orchestrator = orchestrator(fast_config());
    orchestrator.register_agent("agent-1", "worker", "GPT-4o");
    warm_up(&orchestrator, "agent-1").await;

    tick_with(&orchestrator, "agent-1", 30.0).await;
    assert_eq!(orchestrator.lifecycle().get_phase("agent-1"), AgentPhase::Draining);
}
