//! Anomaly detection: compare an agent's recent telemetry window to its baseline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::baseline::{BaselineLearner, MetricKind};
use super::telemetry::AgentVitals;

/// Default σ-multiple threshold above which a metric trips an anomaly.
pub const DEFAULT_DEVIATION_THRESHOLD: f64 = 2.5;
/// Floor applied to `stddev`, as a fraction of `|mean|`, to avoid division by ~0.
pub const DEFAULT_STDDEV_FLOOR_FACTOR: f64 = 0.05;
/// Fixed deviation reported for a prompt-hash change (not a statistical signal).
const PROMPT_CHANGE_DEVIATION: f64 = 10.0;
/// Number of most-recent samples averaged per evaluation.
const WINDOW_SAMPLES: usize = 5;

/// The kinds of anomaly the sentinel can raise, and the metric each is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnomalyKind {
    LatencySpike,
    TokenSpike,
    InputTokenSpike,
    OutputTokenSpike,
    CostSpike,
    ToolExplosion,
    HighRetryRate,
    ErrorRateSpike,
    PromptChange,
}

impl AnomalyKind {
    #[must_use]
    pub fn metric(self) -> Option<MetricKind> {
        match self {
            AnomalyKind::LatencySpike => Some(MetricKind::Latency),
            AnomalyKind::TokenSpike => Some(MetricKind::TotalTokens),
            AnomalyKind::InputTokenSpike => Some(MetricKind::InputTokens),
            AnomalyKind::OutputTokenSpike => Some(MetricKind::OutputTokens),
            AnomalyKind::CostSpike => Some(MetricKind::Cost),
            AnomalyKind::ToolExplosion => Some(MetricKind::ToolCalls),
            AnomalyKind::HighRetryRate => Some(MetricKind::RetryRate),
            AnomalyKind::ErrorRateSpike => Some(MetricKind::ErrorRate),
            AnomalyKind::PromptChange => None,
        }
    }
}

/// Result of one sentinel evaluation for an agent. Ephemeral; not persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub agent_id: String,
    pub deviations: HashMap<AnomalyKind, f64>,
    pub kinds: Vec<AnomalyKind>,
    pub max_deviation: f64,
}

impl AnomalyReport {
    #[must_use]
    pub fn contains(&self, kind: AnomalyKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// `effective_stddev = max(stddev, |mean| * floor_factor)`; `None` when both are zero
/// (a constant-zero baseline makes deviation undefined, so the metric is skipped).
#[must_use]
pub fn safe_deviation(value: f64, mean: f64, stddev: f64, floor_factor: f64) -> Option<f64> {
    let effective_stddev = stddev.max(mean.abs() * floor_factor);
    if effective_stddev <= 0.0 {
        return None;
    }
    Some((value - mean).abs() / effective_stddev)
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Compares recent telemetry against a ready baseline to produce anomaly reports.
pub struct Sentinel {
    threshold: f64,
    floor_factor: f64,
}

impl Sentinel {
    #[must_use]
    pub fn new(threshold: f64, floor_factor: f64) -> Self {
        Self {
            threshold,
            floor_factor,
        }
    }

    /// Evaluate the agent's recent window against its baseline. Returns `None` unless at
    /// least one anomaly kind is triggered. Callers must ensure the baseline is ready
    /// before calling (the sentinel does not itself gate on warmup).
    pub async fn detect(
        &self,
        agent_id: &str,
        recent: &[AgentVitals],
        baseline: &BaselineLearner,
    ) -> Option<AnomalyReport> {
        if recent.is_empty() {
            return None;
        }
        let window: Vec<&AgentVitals> = recent.iter().rev().take(WINDOW_SAMPLES).collect();

        let mut deviations = HashMap::new();

        let metric_samples: [(AnomalyKind, f64); 8] = [
            (
                AnomalyKind::LatencySpike,
                average(&window.iter().map(|v| v.latency_ms).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::TokenSpike,
                average(&window.iter().map(|v| v.total_tokens).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::InputTokenSpike,
                average(&window.iter().map(|v| v.input_tokens).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::OutputTokenSpike,
                average(&window.iter().map(|v| v.output_tokens).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::CostSpike,
                average(&window.iter().map(|v| v.cost).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::ToolExplosion,
                average(&window.iter().map(|v| v.tool_calls).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::HighRetryRate,
                average(&window.iter().map(AgentVitals::retry_indicator).collect::<Vec<_>>()),
            ),
            (
                AnomalyKind::ErrorRateSpike,
                average(&window.iter().map(AgentVitals::error_indicator).collect::<Vec<_>>()),
            ),
        ];

        for (kind, value) in metric_samples {
            let Some(metric_kind) = kind.metric() else {
                continue;
            };
            let Some((mean, stddev)) = baseline.metric(agent_id, metric_kind).await else {
                continue;
            };
            if let Some(deviation) = safe_deviation(value, mean, stddev, self.floor_factor) {
                if deviation > self.threshold {
                    deviations.insert(kind, deviation);
                }
            }
        }

        if let Some(dominant_hash) = baseline.dominant_prompt_hash(agent_id).await {
            let changed = window
                .iter()
                .filter(|v| matches!(&v.prompt_hash, Some(h) if h != &dominant_hash))
                .count();
            if changed * 2 > window.len() {
                deviations.insert(AnomalyKind::PromptChange, PROMPT_CHANGE_DEVIATION);
            }
        }

        if deviations.is_empty() {
            return None;
        }

        let max_deviation = deviations
            .values()
            .copied()
            .fold(f64::MIN, f64::max);
        let kinds: Vec<AnomalyKind> = deviations.keys().copied().collect();

        Some(AnomalyReport {
            agent_id: agent_id.to_string(),
            deviations,
            kinds,
            max_deviation,
        })
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new(DEFAULT_DEVIATION_THRESHOLD, DEFAULT_STDDEV_FLOOR_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vitals(latency: f64) -> AgentVitals {
        AgentVitals {
            agent_id: "a1".to_string(),
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
            prompt_hash: Some("stable".to_string()),
        }
    }

    #[test]
    fn safe_deviation_applies_floor() {
        let deviation = safe_deviation(110.0, 100.0, 0.1, 0.05).expect("deviation");
        assert!((deviation - 2.0).abs() < 1e-9);
    }

    #[test]
    fn safe_deviation_undefined_when_zero() {
        assert!(safe_deviation(0.0, 0.0, 0.0, 0.05).is_none());
    }

    #[tokio::test]
    async fn latency_spike_is_detected() {
        let baseline = BaselineLearner::new(50.0, 5, 200);
        for _ in 0..20 {
            baseline
                .observe("a1", &[(MetricKind::Latency, 120.0)], None)
                .await;
        }
        let recent: Vec<AgentVitals> = (0..5).map(|_| vitals(500.0)).collect();
        let sentinel = Sentinel::default();
        let report = sentinel
            .detect("a1", &recent, &baseline)
            .await
            .expect("should detect anomaly");
        assert!(report.contains(AnomalyKind::LatencySpike));
        assert!(report.max_deviation > 2.5);
    }

    #[tokio::test]
    async fn max_deviation_is_the_max_of_per_metric_deviations() {
        let baseline = BaselineLearner::new(50.0, 5, 200);
        for _ in 0..20 {
            baseline
                .observe(
                    "a1",
                    &[(MetricKind::Latency, 120.0), (MetricKind::TotalTokens, 100.0)],
                    None,
                )
                .await;
        }
        let mut recent = Vec::new();
        for _ in 0..5 {
            let mut v = vitals(500.0);
            v.total_tokens = 2000.0;
            recent.push(v);
        }
        let sentinel = Sentinel::default();
        let report = sentinel
            .detect("a1", &recent, &baseline)
            .await
            .expect("should detect anomaly");
        let max = report.deviations.values().copied().fold(f64::MIN, f64::max);
        assert!((report.max_deviation - max).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_anomaly_when_within_bounds() {
        let baseline = BaselineLearner::new(50.0, 5, 200);
        for _ in 0..20 {
            baseline
                .observe("a1", &[(MetricKind::Latency, 120.0)], None)
                .await;
        }
        let recent: Vec<AgentVitals> = (0..5).map(|_| vitals(121.0)).collect();
        let sentinel = Sentinel::default();
        assert!(sentinel.detect("a1", &recent, &baseline).await.is_none());
    }
}
