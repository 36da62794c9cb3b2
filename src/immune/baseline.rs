//! Adaptive per-agent statistical baselines.
//!
//! Each agent gets an exponentially-weighted moving average (EWMA) per metric.
//! The smoothing constant `alpha = 2/(span+1)` trades off responsiveness against
//! noise; `accelerate` temporarily widens it after a heal so the baseline
//! re-converges quickly to the agent's new steady state instead of treating the
//! post-heal behavior as an ongoing anomaly.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Default EWMA span; `alpha = 2/(span+1)`.
pub const DEFAULT_SPAN: f64 = 50.0;
/// Default minimum sample count before a profile is considered ready.
pub const DEFAULT_MIN_SAMPLES: u32 = 15;
/// Default cap on the bounded per-metric window kept for approximate p95.
pub const DEFAULT_P95_WINDOW: usize = 200;
/// Hard ceiling on the accelerated alpha so a single sample can never fully overwrite the mean.
const ACCELERATED_ALPHA_CAP: f64 = 0.3;
/// How many samples, once warmup completes, pass between periodic flush hints.
const FLUSH_EVERY_N_TICKS: u64 = 100;

/// The eight numeric metrics baselined per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Latency,
    TotalTokens,
    InputTokens,
    OutputTokens,
    ToolCalls,
    Cost,
    RetryRate,
    ErrorRate,
}

impl MetricKind {
    #[must_use]
    pub fn all() -> [MetricKind; 8] {
        [
            MetricKind::Latency,
            MetricKind::TotalTokens,
            MetricKind::InputTokens,
            MetricKind::OutputTokens,
            MetricKind::ToolCalls,
            MetricKind::Cost,
            MetricKind::RetryRate,
            MetricKind::ErrorRate,
        ]
    }
}

/// `(mean, variance, count)` for one metric, plus a bounded window for approximate p95.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EwmaMetric {
    pub mean: f64,
    pub variance: f64,
    pub count: u64,
    p95_window: VecDeque<f64>,
    p95_cap: usize,
}

impl EwmaMetric {
    fn new(p95_cap: usize) -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            count: 0,
            p95_window: VecDeque::with_capacity(p95_cap),
            p95_cap,
        }
    }

    /// Standard deviation, derived from the maintained variance.
    #[must_use]
    pub fn stddev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    fn update(&mut self, value: f64, alpha: f64) {
        self.count += 1;
        if self.count == 1 {
            self.mean = value;
            self.variance = 0.0;
        } else {
            let diff = value - self.mean;
            self.mean = alpha.mul_add(value, (1.0 - alpha) * self.mean);
            self.variance = (1.0 - alpha) * (self.variance + alpha * diff * diff);
        }
        if self.p95_window.len() >= self.p95_cap {
            self.p95_window.pop_front();
        }
        self.p95_window.push_back(value);
    }

    /// Approximate 95th percentile over the bounded window.
    #[must_use]
    pub fn p95(&self) -> Option<f64> {
        if self.p95_window.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.p95_window.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * 0.95).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        Some(sorted[idx])
    }
}

/// Serializable snapshot of one agent's baseline, for persistence and API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineProfile {
    pub agent_id: String,
    pub metrics: Vec<(MetricKind, EwmaMetric)>,
    pub sample_count: u64,
    pub dominant_prompt_hash: Option<String>,
    pub ready: bool,
}

struct AgentBaseline {
    metrics: std::collections::HashMap<MetricKind, EwmaMetric>,
    sample_count: u64,
    dominant_prompt_hash: Option<String>,
    base_alpha: f64,
    accel_remaining: u32,
    accel_alpha: f64,
    ticks_since_flush: u64,
    flush_pending: bool,
}

impl AgentBaseline {
    fn new(span: f64, p95_cap: usize) -> Self {
        let base_alpha = 2.0 / (span + 1.0);
        let mut metrics = std::collections::HashMap::new();
        for kind in MetricKind::all() {
            metrics.insert(kind, EwmaMetric::new(p95_cap));
        }
        Self {
            metrics,
            sample_count: 0,
            dominant_prompt_hash: None,
            base_alpha,
            accel_remaining: 0,
            accel_alpha: base_alpha,
            ticks_since_flush: 0,
            flush_pending: false,
        }
    }

    fn current_alpha(&self) -> f64 {
        if self.accel_remaining > 0 {
            self.accel_alpha
        } else {
            self.base_alpha
        }
    }

    fn update(&mut self, samples: &[(MetricKind, f64)], prompt_hash: Option<&str>) {
        let alpha = self.current_alpha();
        for (kind, value) in samples {
            if let Some(metric) = self.metrics.get_mut(kind) {
                metric.update(*value, alpha);
            }
        }
        self.sample_count += 1;
        if self.accel_remaining > 0 {
            self.accel_remaining -= 1;
        }
        if let Some(hash) = prompt_hash {
            if !hash.is_empty() {
                self.dominant_prompt_hash = Some(hash.to_string());
            }
        }
        self.ticks_since_flush += 1;
    }

    fn is_ready(&self, min_samples: u32) -> bool {
        self.sample_count >= u64::from(min_samples)
    }
}

/// Per-agent EWMA statistical profiles with warmup gating and post-heal acceleration.
pub struct BaselineLearner {
    agents: DashMap<String, RwLock<AgentBaseline>>,
    span: f64,
    min_samples: u32,
    p95_cap: usize,
}

impl BaselineLearner {
    #[must_use]
    pub fn new(span: f64, min_samples: u32, p95_cap: usize) -> Self {
        Self {
            agents: DashMap::new(),
            span,
            min_samples,
            p95_cap,
        }
    }

    /// Feed one vitals point's derived metric samples into the agent's baseline.
    /// Creates the agent's baseline lazily on first observation.
    pub async fn observe(
        &self,
        agent_id: &str,
        samples: &[(MetricKind, f64)],
        prompt_hash: Option<&str>,
    ) {
        let entry = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| RwLock::new(AgentBaseline::new(self.span, self.p95_cap)));
        let mut guard = entry.write().await;
        let was_ready = guard.is_ready(self.min_samples);
        guard.update(samples, prompt_hash);
        if !was_ready && guard.is_ready(self.min_samples) {
            guard.flush_pending = true;
            guard.ticks_since_flush = 0;
        }
    }

    /// Whether the agent has accumulated at least `min_samples` updates.
    pub async fn is_ready(&self, agent_id: &str) -> bool {
        match self.agents.get(agent_id) {
            Some(entry) => entry.read().await.is_ready(self.min_samples),
            None => false,
        }
    }

    /// A specific metric's `(mean, stddev)` for the agent, if its baseline exists.
    pub async fn metric(&self, agent_id: &str, kind: MetricKind) -> Option<(f64, f64)> {
        let entry = self.agents.get(agent_id)?;
        let guard = entry.read().await;
        let metric = guard.metrics.get(&kind)?;
        Some((metric.mean, metric.stddev()))
    }

    /// The agent's dominant (most recently observed non-empty) prompt hash.
    pub async fn dominant_prompt_hash(&self, agent_id: &str) -> Option<String> {
        let entry = self.agents.get(agent_id)?;
        entry.read().await.dominant_prompt_hash.clone()
    }

    /// Whether a flush (warmup completion, or every `FLUSH_EVERY_N_TICKS` ticks) is due;
    /// the orchestrator owns the store and calls this to decide when to persist.
    pub async fn should_flush(&self, agent_id: &str) -> bool {
        let Some(entry) = self.agents.get(agent_id) else {
            return false;
        };
        let guard = entry.read().await;
        guard.flush_pending || (guard.sample_count > 0 && guard.ticks_since_flush >= FLUSH_EVERY_N_TICKS)
    }

    /// Clear the flush-due flag after the orchestrator has persisted a snapshot.
    pub async fn mark_flushed(&self, agent_id: &str) {
        if let Some(entry) = self.agents.get(agent_id) {
            let mut guard = entry.write().await;
            guard.flush_pending = false;
            guard.ticks_since_flush = 0;
        }
    }

    /// A full serializable snapshot of the agent's baseline, or `None` if unseen.
    pub async fn profile(&self, agent_id: &str) -> Option<BaselineProfile> {
        let entry = self.agents.get(agent_id)?;
        let guard = entry.read().await;
        Some(BaselineProfile {
            agent_id: agent_id.to_string(),
            metrics: guard
                .metrics
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
            sample_count: guard.sample_count,
            dominant_prompt_hash: guard.dominant_prompt_hash.clone(),
            ready: guard.is_ready(self.min_samples),
        })
    }

    /// Temporarily widen `alpha` for this agent for the next `ticks` updates, using
    /// `fast_span` in place of the normal span, so the baseline converges quickly to
    /// a post-heal steady state instead of flagging it.
    pub async fn accelerate(&self, agent_id: &str, ticks: u32, fast_span: f64) {
        let entry = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| RwLock::new(AgentBaseline::new(self.span, self.p95_cap)));
        let mut guard = entry.write().await;
        let accel_span = fast_span.max(1.0);
        guard.accel_alpha = (2.0 / (accel_span + 1.0)).min(ACCELERATED_ALPHA_CAP);
        guard.accel_remaining = ticks;
    }

    /// Hard-clear all learned state for an agent; it is not ready again until
    /// `min_samples` fresh updates arrive.
    pub async fn reset(&self, agent_id: &str) {
        self.agents
            .insert(agent_id.to_string(), RwLock::new(AgentBaseline::new(self.span, self.p95_cap)));
    }

    /// Agent ids with any baseline state.
    #[must_use]
    pub fn known_agents(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for BaselineLearner {
    fn default() -> Self {
        Self::new(DEFAULT_SPAN, DEFAULT_MIN_SAMPLES, DEFAULT_P95_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ewma_converges_to_constant_input() {
        let learner = BaselineLearner::new(50.0, 15, 200);
        for _ in 0..100 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        let (mean, stddev) = learner
            .metric("a1", MetricKind::Latency)
            .await
            .expect("metric should exist");
        assert!((99.0..=101.0).contains(&mean), "mean was {mean}");
        assert!(stddev < 1.0, "stddev was {stddev}");
    }

    #[tokio::test]
    async fn drift_adaptation_tracks_new_steady_state() {
        let learner = BaselineLearner::new(10.0, 15, 200);
        for _ in 0..50 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        for _ in 0..50 {
            learner
                .observe("a1", &[(MetricKind::Latency, 200.0)], None)
                .await;
        }
        let (mean, _) = learner
            .metric("a1", MetricKind::Latency)
            .await
            .expect("metric should exist");
        assert!((195.0..=205.0).contains(&mean), "mean was {mean}");
    }

    #[tokio::test]
    async fn not_ready_before_min_samples() {
        let learner = BaselineLearner::new(50.0, 15, 200);
        for _ in 0..10 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        assert!(!learner.is_ready("a1").await);
        for _ in 0..5 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        assert!(learner.is_ready("a1").await);
    }

    #[tokio::test]
    async fn variance_never_negative() {
        let learner = BaselineLearner::new(20.0, 5, 50);
        let values = [10.0, 500.0, 5.0, 300.0, 1.0, 1000.0];
        for v in values {
            learner.observe("a1", &[(MetricKind::Cost, v)], None).await;
        }
        let (_, stddev) = learner
            .metric("a1", MetricKind::Cost)
            .await
            .expect("metric should exist");
        assert!(stddev >= 0.0);
    }

    #[tokio::test]
    async fn reset_clears_warmup() {
        let learner = BaselineLearner::new(50.0, 15, 200);
        for _ in 0..20 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        assert!(learner.is_ready("a1").await);
        learner.reset("a1").await;
        assert!(!learner.is_ready("a1").await);
        for _ in 0..14 {
            learner
                .observe("a1", &[(MetricKind::Latency, 100.0)], None)
                .await;
        }
        assert!(!learner.is_ready("a1").await);
    }

    #[tokio::test]
    async fn prompt_hash_tracks_most_recent_nonempty() {
        let learner = BaselineLearner::new(50.0, 15, 200);
        learner
            .observe("a1", &[(MetricKind::Latency, 100.0)], Some("hash-a"))
            .await;
        learner.observe("a1", &[(MetricKind::Latency, 100.0)], None).await;
        assert_eq!(
            learner.dominant_prompt_hash("a1").await,
            Some("hash-a".to_string())
        );
    }
}
