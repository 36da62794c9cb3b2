//! Chaos harness: synthesizes realistic-looking [`AgentVitals`](super::telemetry::AgentVitals)
//! for demo and test fleets, optionally skewed by an injected fault so the
//! detection pipeline has something to catch. This never bypasses detection;
//! it only manufactures the telemetry an infected agent would have emitted.

use std::collections::HashSet;

use chrono::Utc;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::registry::{model_cost_per_1k, AgentRecord};
use super::telemetry::AgentVitals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfectionType {
    TokenExplosion,
    ToolLoop,
    LatencySpike,
    HighRetryRate,
    PromptDrift,
    MemoryCorruption,
    FullMeltdown,
}

impl InfectionType {
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            InfectionType::TokenExplosion => "TOKEN SPIKE",
            InfectionType::ToolLoop => "TOOL LOOP",
            InfectionType::LatencySpike => "LATENCY SPIKE",
            InfectionType::HighRetryRate => "HIGH RETRY RATE",
            InfectionType::PromptDrift => "PROMPT DRIFT",
            InfectionType::MemoryCorruption => "MEMORY CORRUPTION",
            InfectionType::FullMeltdown => "FULL MELTDOWN",
        }
    }

    const ALL: [InfectionType; 7] = [
        InfectionType::TokenExplosion,
        InfectionType::ToolLoop,
        InfectionType::LatencySpike,
        InfectionType::HighRetryRate,
        InfectionType::PromptDrift,
        InfectionType::MemoryCorruption,
        InfectionType::FullMeltdown,
    ];

    const SEVERE: [InfectionType; 3] = [
        InfectionType::PromptDrift,
        InfectionType::MemoryCorruption,
        InfectionType::FullMeltdown,
    ];
}

/// Tracks which agents currently have a chaos fault injected and synthesizes
/// their vitals accordingly.
pub struct ChaosInjector {
    injected: DashMap<String, InfectionType>,
}

impl ChaosInjector {
    #[must_use]
    pub fn new() -> Self {
        Self { injected: DashMap::new() }
    }

    pub fn inject_token_spike(&self, agent_id: &str) {
        self.inject(agent_id, InfectionType::TokenExplosion);
    }

    pub fn inject_tool_loop(&self, agent_id: &str) {
        self.inject(agent_id, InfectionType::ToolLoop);
    }

    pub fn inject_latency_spike(&self, agent_id: &str) {
        self.inject(agent_id, InfectionType::LatencySpike);
    }

    pub fn inject(&self, agent_id: &str, infection: InfectionType) {
        self.injected.insert(agent_id.to_string(), infection);
    }

    /// Injects a mix of faults into `count` of the given (currently healthy)
    /// agent ids, weighting severe multi-signal infections at ~70%. Returns
    /// the `(agent_id, display_name)` pairs actually injected.
    pub fn inject_random_failures(&self, candidate_agent_ids: &[String], count: usize) -> Vec<(String, &'static str)> {
        let available: Vec<&String> = candidate_agent_ids
            .iter()
            .filter(|id| !self.injected.contains_key(id.as_str()))
            .collect();
        let count = count.min(available.len());
        let mut rng = rand::thread_rng();
        let mut pool = available;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let idx = rng.gen_range(0..pool.len());
            let agent_id = pool.remove(idx).clone();
            let infection = if rng.gen_bool(0.7) {
                InfectionType::SEVERE[rng.gen_range(0..InfectionType::SEVERE.len())]
            } else {
                InfectionType::ALL[rng.gen_range(0..InfectionType::ALL.len())]
            };
            self.inject(&agent_id, infection);
            results.push((agent_id, infection.display_name()));
        }
        results
    }

    #[must_use]
    pub fn is_injected(&self, agent_id: &str) -> bool {
        self.injected.contains_key(agent_id)
    }

    pub fn clear_injection(&self, agent_id: &str) {
        self.injected.remove(agent_id);
    }

    #[must_use]
    pub fn injected_agent_ids(&self) -> HashSet<String> {
        self.injected.iter().map(|e| e.key().clone()).collect()
    }

    /// Synthesize one vitals point for `record`, skewed by whatever infection
    /// (if any) is currently injected for it.
    #[must_use]
    pub fn synthesize_vitals(&self, record: &AgentRecord) -> AgentVitals {
        let infection = self.injected.get(&record.agent_id).map(|e| *e);
        let mut rng = rand::thread_rng();
        let variance = rng.gen_range(0.8..1.2);

        let (latency_ms, input_tokens, output_tokens, tool_calls, retries, error_category, prompt_hash) =
            match infection {
                None => {
                    let total = record.base_tokens * variance;
                    let input = total * rng.gen_range(0.55..0.75);
                    let output = total - input;
                    (
                        record.base_latency_ms * variance,
                        input,
                        output,
                        (record.base_tool_calls * variance).max(1.0),
                        if rng.gen_bool(0.1) { 1.0 } else { 0.0 },
                        None,
                        record.prompt_hash.clone(),
                    )
                }
                Some(kind) => {
                    let base_input = record.base_tokens * 0.65;
                    let base_output = record.base_tokens * 0.35;
                    let latency = match kind {
                        InfectionType::LatencySpike => record.base_latency_ms * rng.gen_range(3.0..7.0),
                        InfectionType::PromptDrift | InfectionType::MemoryCorruption | InfectionType::FullMeltdown => {
                            record.base_latency_ms * rng.gen_range(3.0..6.0)
                        }
                        _ => record.base_latency_ms,
                    };
                    let input = match kind {
                        InfectionType::TokenExplosion => base_input * rng.gen_range(5.0..10.0),
                        InfectionType::PromptDrift | InfectionType::FullMeltdown => base_input * rng.gen_range(3.0..6.0),
                        _ => base_input * rng.gen_range(0.8..1.2),
                    };
                    let output = match kind {
                        InfectionType::TokenExplosion | InfectionType::FullMeltdown => base_output * rng.gen_range(5.0..12.0),
                        InfectionType::PromptDrift => base_output * rng.gen_range(4.0..8.0),
                        _ => base_output * rng.gen_range(0.8..1.2),
                    };
                    let tool_calls = match kind {
                        InfectionType::ToolLoop => record.base_tool_calls * rng.gen_range(5.0..11.0),
                        InfectionType::FullMeltdown => record.base_tool_calls * rng.gen_range(5.0..10.0),
                        _ => record.base_tool_calls,
                    };
                    let retries = match kind {
                        InfectionType::HighRetryRate => {
                            if rng.gen_bool(0.75) {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        InfectionType::MemoryCorruption => {
                            if rng.gen_bool(0.7) {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        _ => {
                            if rng.gen_bool(0.1) {
                                1.0
                            } else {
                                0.0
                            }
                        }
                    };
                    let error_category = match kind {
                        InfectionType::HighRetryRate if rng.gen_bool(0.6) => {
                            Some(["rate_limit", "timeout", ""][rng.gen_range(0..3)].to_string()).filter(|s| !s.is_empty())
                        }
                        InfectionType::MemoryCorruption if rng.gen_bool(0.4) => Some("content_filter".to_string()),
                        _ => None,
                    };
                    let prompt_hash = match kind {
                        InfectionType::PromptDrift => {
                            format!("{:x}", Sha256::digest(format!("corrupted-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0)).as_bytes()))
                                [..16]
                                .to_string()
                        }
                        _ => record.prompt_hash.clone(),
                    };
                    (latency, input, output, tool_calls, retries, error_category, prompt_hash)
                }
            };

        let total_tokens = input_tokens + output_tokens;
        let success = error_category.is_none() && rng.gen_bool(0.95);

        AgentVitals {
            agent_id: record.agent_id.clone(),
            timestamp: Utc::now(),
            agent_type: record.agent_type.clone(),
            latency_ms,
            total_tokens,
            input_tokens,
            output_tokens,
            tool_calls,
            retries,
            success,
            cost: (total_tokens * model_cost_per_1k(&record.model) / 1000.0 * 1_000_000.0).round() / 1_000_000.0,
            model: record.model.clone(),
            error_category,
            prompt_hash: Some(prompt_hash),
        }
    }
}

impl Default for ChaosInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_agent_produces_inflated_vitals() {
        let injector = ChaosInjector::new();
        let record = AgentRecord::new("a1", "worker", "GPT-4o");
        injector.inject_token_spike("a1");
        let vitals = injector.synthesize_vitals(&record);
        assert!(vitals.input_tokens > record.base_tokens * 0.65 * 4.0);
    }

    #[test]
    fn healthy_agent_stays_near_baseline() {
        let injector = ChaosInjector::new();
        let record = AgentRecord::new("a1", "worker", "GPT-4o");
        let vitals = injector.synthesize_vitals(&record);
        assert!(vitals.latency_ms <= record.base_latency_ms * 1.3);
    }

    #[test]
    fn clear_injection_restores_healthy_generation() {
        let injector = ChaosInjector::new();
        injector.inject_latency_spike("a1");
        assert!(injector.is_injected("a1"));
        injector.clear_injection("a1");
        assert!(!injector.is_injected("a1"));
    }

    #[test]
    fn random_failures_never_exceed_available_agents() {
        let injector = ChaosInjector::new();
        let ids = vec!["a1".to_string(), "a2".to_string()];
        let injected = injector.inject_random_failures(&ids, 5);
        assert_eq!(injected.len(), 2);
    }
}
