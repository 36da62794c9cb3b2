//! Bounded per-agent vitals buffer.
//!
//! One [`AgentVitals`] record per agent execution flows in here; the buffer
//! keeps a bounded, append-only ring per agent and answers window queries
//! for the sentinel. Every `record()` also feeds the fleet-level OpenTelemetry
//! instrumentation named to match the reverse-proxy collaborator's meter.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Default bound on in-memory samples kept per agent before the oldest are evicted.
pub const DEFAULT_MAX_IN_MEMORY_SAMPLES: usize = 500;

/// One telemetry point describing a single agent execution.
///
/// Mandatory fields are `agent_id`, `timestamp`, `latency_ms`, `success`; everything
/// else defaults (numeric fields to `0`, strings to empty/`None`) so partial
/// ingestion payloads from collaborators never fail to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentVitals {
    pub agent_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub agent_type: String,
    pub latency_ms: f64,
    #[serde(default)]
    pub total_tokens: f64,
    #[serde(default)]
    pub input_tokens: f64,
    #[serde(default)]
    pub output_tokens: f64,
    #[serde(default)]
    pub tool_calls: f64,
    #[serde(default)]
    pub retries: f64,
    pub success: bool,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub error_category: Option<String>,
    #[serde(default)]
    pub prompt_hash: Option<String>,
}

impl AgentVitals {
    /// `1.0` if this execution retried at least once, else `0.0`; the sentinel treats
    /// this as a rate-like metric rather than a raw count.
    #[must_use]
    pub fn retry_indicator(&self) -> f64 {
        if self.retries > 0.0 {
            1.0
        } else {
            0.0
        }
    }

    /// `1.0` if this execution carries a non-empty error category.
    #[must_use]
    pub fn error_indicator(&self) -> f64 {
        match &self.error_category {
            Some(category) if !category.is_empty() => 1.0,
            _ => 0.0,
        }
    }
}

struct TelemetryMetrics {
    execution_count: Counter<u64>,
    latency_ms: Histogram<f64>,
    token_count: Histogram<f64>,
    tool_calls: Histogram<f64>,
    retries: Counter<u64>,
    input_tokens: Histogram<f64>,
    output_tokens: Histogram<f64>,
    cost: Histogram<f64>,
}

impl TelemetryMetrics {
    fn new() -> Self {
        let meter = global::meter("immune-system.telemetry");
        Self {
            execution_count: meter.u64_counter("agent.execution.count").init(),
            latency_ms: meter.f64_histogram("agent.execution.latency_ms").init(),
            token_count: meter.f64_histogram("agent.execution.token_count").init(),
            tool_calls: meter.f64_histogram("agent.execution.tool_calls").init(),
            retries: meter.u64_counter("agent.execution.retries").init(),
            input_tokens: meter.f64_histogram("agent.execution.input_tokens").init(),
            output_tokens: meter.f64_histogram("agent.execution.output_tokens").init(),
            cost: meter.f64_histogram("agent.execution.cost").init(),
        }
    }

    fn record(&self, vitals: &AgentVitals) {
        let attrs = [KeyValue::new("agent_id", vitals.agent_id.clone())];
        self.execution_count.add(1, &attrs);
        self.latency_ms.record(vitals.latency_ms, &attrs);
        self.token_count.record(vitals.total_tokens, &attrs);
        self.tool_calls.record(vitals.tool_calls, &attrs);
        if vitals.retries > 0.0 {
            self.retries.add(vitals.retries as u64, &attrs);
        }
        self.input_tokens.record(vitals.input_tokens, &attrs);
        self.output_tokens.record(vitals.output_tokens, &attrs);
        self.cost.record(vitals.cost, &attrs);
    }
}

/// Bounded per-agent ring of recent vitals, with window and latest-point queries.
pub struct TelemetryBuffer {
    buffers: DashMap<String, Arc<RwLock<VecDeque<AgentVitals>>>>,
    capacity: usize,
    metrics: TelemetryMetrics,
}

impl TelemetryBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity,
            metrics: TelemetryMetrics::new(),
        }
    }

    /// Append a vitals point, evicting the oldest if the per-agent buffer is full.
    pub async fn record(&self, vitals: AgentVitals) {
        self.metrics.record(&vitals);
        let buffer = self
            .buffers
            .entry(vitals.agent_id.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::with_capacity(self.capacity))))
            .clone();
        let mut guard = buffer.write().await;
        if guard.len() >= self.capacity {
            guard.pop_front();
        }
        guard.push_back(vitals);
    }

    /// All points for `agent` with timestamp within `window_seconds` of now.
    pub async fn recent(&self, agent: &str, window_seconds: i64) -> Vec<AgentVitals> {
        let Some(buffer) = self.buffers.get(agent).map(|b| b.clone()) else {
            return Vec::new();
        };
        let cutoff = Utc::now() - chrono::Duration::seconds(window_seconds);
        let guard = buffer.read().await;
        guard
            .iter()
            .filter(|v| v.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// The most recent point for `agent`, if any.
    pub async fn latest(&self, agent: &str) -> Option<AgentVitals> {
        let buffer = self.buffers.get(agent)?.clone();
        let guard = buffer.read().await;
        guard.back().cloned()
    }

    /// Number of points currently buffered for `agent`.
    pub async fn count(&self, agent: &str) -> usize {
        match self.buffers.get(agent) {
            Some(buffer) => buffer.clone().read().await.len(),
            None => 0,
        }
    }

    /// Sum of buffered points across all agents.
    pub async fn total(&self) -> usize {
        let mut total = 0;
        for entry in &self.buffers {
            total += entry.value().clone().read().await.len();
        }
        total
    }

    /// Agent ids with at least one buffered point.
    #[must_use]
    pub fn known_agents(&self) -> Vec<String> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_MEMORY_SAMPLES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vitals(agent: &str, latency: f64) -> AgentVitals {
        AgentVitals {
            agent_id: agent.to_string(),
            timestamp: Utc::now(),
            agent_type: "worker".to_string(),
            latency_ms: latency,
            total_tokens: 100.0,
            input_tokens: 60.0,
            output_tokens: 40.0,
            tool_calls: 1.0,
            retries: 0.0,
            success: true,
            cost: 0.01,
            model: "gpt-4".to_string(),
            error_category: None,
            prompt_hash: Some("abc".to_string()),
        }
    }

    #[tokio::test]
    async fn record_then_latest_round_trips() {
        let buffer = TelemetryBuffer::new(10);
        buffer.record(vitals("a1", 120.0)).await;
        let latest = buffer.latest("a1").await.expect("should have a point");
        assert_eq!(latest.latency_ms, 120.0);
    }

    #[tokio::test]
    async fn bounded_capacity_evicts_oldest() {
        let buffer = TelemetryBuffer::new(3);
        for i in 0..5 {
            buffer.record(vitals("a1", f64::from(i))).await;
        }
        assert_eq!(buffer.count("a1").await, 3);
        let latest = buffer.latest("a1").await.expect("should have a point");
        assert_eq!(latest.latency_ms, 4.0);
    }

    #[tokio::test]
    async fn unknown_agent_returns_empty() {
        let buffer = TelemetryBuffer::new(10);
        assert!(buffer.recent("ghost", 60).await.is_empty());
        assert_eq!(buffer.count("ghost").await, 0);
    }

    #[tokio::test]
    async fn total_sums_across_agents() {
        let buffer = TelemetryBuffer::new(10);
        buffer.record(vitals("a1", 10.0)).await;
        buffer.record(vitals("a2", 10.0)).await;
        buffer.record(vitals("a2", 10.0)).await;
        assert_eq!(buffer.total().await, 3);
    }
}
