//! Agent registry: the set of agents the control plane knows about and their
//! static metadata, independent of behavioral state (telemetry/baseline/lifecycle).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Approximate cost per 1K tokens by model name, USD. Used by the chaos
/// harness to synthesize a plausible `cost` figure; unknown models fall back
/// to a flat default rate.
pub fn model_cost_per_1k(model: &str) -> f64 {
    match model {
        "GPT-5" => 0.03,
        "GPT-4o" => 0.005,
        "Claude Sonnet 4" => 0.003,
        "Claude Opus 4" => 0.015,
        "Claude Sonnet 3.5" => 0.003,
        "Gemini 2.0" => 0.00_125,
        _ => 0.005,
    }
}

/// Static per-agent metadata plus the baseline behavioral parameters the
/// chaos harness varies around.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub model: String,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    pub base_latency_ms: f64,
    pub base_tokens: f64,
    pub base_tool_calls: f64,
    pub prompt_hash: String,
    pub registered_at: DateTime<Utc>,
}

impl AgentRecord {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, model: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        let prompt_hash = format!("{:x}", Sha256::digest(format!("system-prompt-v1-{agent_id}").as_bytes()))[..16].to_string();
        Self {
            agent_id,
            agent_type: agent_type.into(),
            model: model.into(),
            mcp_servers: Vec::new(),
            base_latency_ms: 300.0,
            base_tokens: 1250.0,
            base_tool_calls: 3.0,
            prompt_hash,
            registered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_mcp_servers(mut self, servers: Vec<String>) -> Self {
        self.mcp_servers = servers;
        self
    }
}

/// Concurrent registry of known agents.
pub struct AgentRegistry {
    agents: DashMap<String, AgentRecord>,
}

impl AgentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { agents: DashMap::new() }
    }

    pub fn register(&self, record: AgentRecord) {
        self.agents.insert(record.agent_id.clone(), record);
    }

    #[must_use]
    pub fn get(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.get(agent_id).map(|r| r.clone())
    }

    pub fn deregister(&self, agent_id: &str) -> Option<AgentRecord> {
        self.agents.remove(agent_id).map(|(_, r)| r)
    }

    #[must_use]
    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<AgentRecord> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    #[must_use]
    pub fn known_agent_ids(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_get_round_trips() {
        let registry = AgentRegistry::new();
        registry.register(AgentRecord::new("a1", "worker", "GPT-4o"));
        let record = registry.get("a1").expect("should be registered");
        assert_eq!(record.model, "GPT-4o");
        assert_eq!(record.prompt_hash.len(), 16);
    }

    #[test]
    fn deregister_removes_agent() {
        let registry = AgentRegistry::new();
        registry.register(AgentRecord::new("a1", "worker", "GPT-4o"));
        assert!(registry.deregister("a1").is_some());
        assert!(!registry.contains("a1"));
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        assert!((model_cost_per_1k("some-unlisted-model") - 0.005).abs() < 1e-9);
    }
}
