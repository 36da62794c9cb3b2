//! Standalone demo: spins up an in-memory fleet, lets it run healthy for a
//! while, injects chaos faults into a handful of agents, then drives the
//! orchestrator's tick loop and prints the detect -> diagnose -> quarantine
//! -> heal -> validate pipeline as it plays out.
//!
//! Run with `cargo run --bin chaos-demo`.

use std::sync::Arc;
use std::time::Duration;

use immune_control_plane::immune::enforcement::NoOpEnforcement;
use immune_control_plane::immune::executor::SimulatedExecutor;
use immune_control_plane::immune::AgentPhase;
use immune_control_plane::immune::Orchestrator;
use immune_control_plane::utils::config::ImmuneConfig;

const FLEET_SIZE: usize = 12;
const TICKS: usize = 40;
const AGENT_TYPES: [&str; 3] = ["worker", "researcher", "coordinator"];
const MODELS: [&str; 4] = ["GPT-4o", "Claude Sonnet 4", "Claude Opus 4", "Gemini 2.0"];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = Arc::new(ImmuneConfig::default());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&config),
        Arc::new(NoOpEnforcement::new()),
        Arc::new(SimulatedExecutor::new()),
        None,
        None,
    ));

    let mut agent_ids = Vec::with_capacity(FLEET_SIZE);
    for i in 0..FLEET_SIZE {
        let agent_id = format!("agent-{i}");
        let agent_type = AGENT_TYPES[i % AGENT_TYPES.len()];
        let model = MODELS[i % MODELS.len()];
        orchestrator.register_agent(&agent_id, agent_type, model);
        agent_ids.push(agent_id);
    }
    println!("registered {} agents", agent_ids.len());

    // Warm up the baseline with a few clean ticks before anything gets sick.
    for _ in 0..5 {
        for agent_id in &agent_ids {
            let record = orchestrator.registry().get(agent_id).expect("just registered");
            let vitals = orchestrator.chaos.synthesize_vitals(&record);
            let _ = orchestrator.ingest_vitals(vitals).await;
        }
        orchestrator.tick().await;
    }
    println!("baseline warmed up over 5 ticks");

    let injected = orchestrator.chaos.inject_random_failures(&agent_ids, 3);
    for (agent_id, kind) in &injected {
        println!("injected {kind} into {agent_id}");
    }

    for tick in 0..TICKS {
        for agent_id in &agent_ids {
            let Some(record) = orchestrator.registry().get(agent_id) else {
                continue;
            };
            let vitals = orchestrator.chaos.synthesize_vitals(&record);
            let _ = orchestrator.ingest_vitals(vitals).await;
        }
        orchestrator.tick().await;

        for pending in orchestrator.get_pending_approvals() {
            println!("tick {tick}: {} awaiting human approval to heal", pending.agent_id);
            let _ = orchestrator.approve_healing(&pending.agent_id, true).await;
        }

        for agent_id in &injected_ids(&injected) {
            let phase = orchestrator.lifecycle().get_phase(agent_id);
            if phase != AgentPhase::Healthy {
                println!("tick {tick}: {agent_id} is {phase:?}");
            }
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let stats = orchestrator.stats().await;
    println!("\nfinal fleet stats: {stats:#?}");
}

fn injected_ids(injected: &[(String, &'static str)]) -> Vec<String> {
    injected.iter().map(|(id, _)| id.clone()).collect()
}
