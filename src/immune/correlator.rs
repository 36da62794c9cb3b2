//! Fleet-wide correlation: distinguish one agent's own malfunction from a
//! shared external cause (a flaky provider, a bad deploy) hitting many agents at once.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::baseline::BaselineLearner;
use super::sentinel::{AnomalyKind, AnomalyReport, Sentinel};
use super::telemetry::TelemetryBuffer;

/// Default fraction of the fleet affected at or above which the verdict is fleet-wide.
pub const DEFAULT_FLEET_WIDE_FRACTION: f64 = 0.30;
/// Default fraction at or above which the verdict is partial-fleet.
pub const DEFAULT_PARTIAL_FLEET_FRACTION: f64 = 0.15;
/// Window used to decide whether another agent has "recent" telemetry to evaluate.
const RECENT_WINDOW_SECONDS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationVerdict {
    FleetWide,
    PartialFleet,
    AgentSpecific,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub verdict: CorrelationVerdict,
    pub fraction: f64,
    pub intersecting_kinds: Vec<AnomalyKind>,
    pub affected_agents: Vec<String>,
}

/// Cross-agent overlap check run once an infected agent's lifecycle reaches DRAINING.
pub struct FleetCorrelator {
    fleet_wide_fraction: f64,
    partial_fleet_fraction: f64,
}

impl FleetCorrelator {
    #[must_use]
    pub fn new(fleet_wide_fraction: f64, partial_fleet_fraction: f64) -> Self {
        Self {
            fleet_wide_fraction,
            partial_fleet_fraction,
        }
    }

    /// Correlate `infection` (for the agent it was raised against) with every other
    /// known agent that has a ready baseline and recent telemetry.
    pub async fn correlate(
        &self,
        infection: &AnomalyReport,
        all_agent_ids: &[String],
        telemetry: &TelemetryBuffer,
        baseline: &BaselineLearner,
        sentinel: &Sentinel,
    ) -> CorrelationResult {
        let infected_kinds: HashSet<AnomalyKind> = infection.kinds.iter().copied().collect();
        let mut monitored = 0usize;
        let mut affected_agents = Vec::new();
        let mut intersecting: HashSet<AnomalyKind> = HashSet::new();

        for agent_id in all_agent_ids {
            if agent_id == &infection.agent_id {
                continue;
            }
            if !baseline.is_ready(agent_id).await {
                continue;
            }
            let recent = telemetry.recent(agent_id, RECENT_WINDOW_SECONDS).await;
            if recent.is_empty() {
                continue;
            }
            monitored += 1;

            if let Some(report) = sentinel.detect(agent_id, &recent, baseline).await {
                let overlap: Vec<AnomalyKind> = report
                    .kinds
                    .iter()
                    .copied()
                    .filter(|k| infected_kinds.contains(k))
                    .collect();
                if !overlap.is_empty() {
                    affected_agents.push(agent_id.clone());
                    intersecting.extend(overlap);
                }
            }
        }

        let fraction = affected_agents.len() as f64 / (monitored.max(1) as f64);
        let verdict = if fraction >= self.fleet_wide_fraction {
            CorrelationVerdict::FleetWide
        } else if fraction >= self.partial_fleet_fraction {
            CorrelationVerdict::PartialFleet
        } else {
            CorrelationVerdict::AgentSpecific
        };

        CorrelationResult {
            verdict,
            fraction,
            intersecting_kinds: intersecting.into_iter().collect(),
            affected_agents,
        }
    }
}

impl Default for FleetCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_FLEET_WIDE_FRACTION, DEFAULT_PARTIAL_FLEET_FRACTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::immune::baseline::MetricKind;
    use crate::immune::telemetry::AgentVitals;
    use chrono::Utc;

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
            prompt_hash: Some("stable".to_string()),
        }
    }

    #[tokio::test]
    async fn fleet_wide_when_many_agents_share_the_anomaly() {
        let telemetry = TelemetryBuffer::new(100);
        let baseline = BaselineLearner::new(50.0, 5, 200);
        let sentinel = Sentinel::default();
        let correlator = FleetCorrelator::default();

        let mut agent_ids = Vec::new();
        for i in 0..11 {
            let agent = format!("a{i}");
            agent_ids.push(agent.clone());
            for _ in 0..20 {
                baseline
                    .observe(&agent, &[(MetricKind::Latency, 120.0)], None)
                    .await;
            }
            let latency = if i < 5 { 500.0 } else { 121.0 };
            for _ in 0..5 {
                telemetry.record(vitals(&agent, latency)).await;
            }
        }

        let recent = telemetry.recent("a0", 60).await;
        let infection = sentinel
            .detect("a0", &recent, &baseline)
            .await
            .expect("a0 should be anomalous");

        let result = correlator
            .correlate(&infection, &agent_ids, &telemetry, &baseline, &sentinel)
            .await;
        assert_eq!(result.verdict, CorrelationVerdict::FleetWide);
        assert!(result.fraction >= 0.30);
    }

    #[tokio::test]
    async fn agent_specific_when_isolated() {
        let telemetry = TelemetryBuffer::new(100);
        let baseline = BaselineLearner::new(50.0, 5, 200);
        let sentinel = Sentinel::default();
        let correlator = FleetCorrelator::default();

        let mut agent_ids = Vec::new();
        for i in 0..11 {
            let agent = format!("a{i}");
            agent_ids.push(agent.clone());
            for _ in 0..20 {
                baseline
                    .observe(&agent, &[(MetricKind::Latency, 120.0)], None)
                    .await;
            }
            let latency = if i == 0 { 500.0 } else { 121.0 };
            for _ in 0..5 {
                telemetry.record(vitals(&agent, latency)).await;
            }
        }

        let recent = telemetry.recent("a0", 60).await;
        let infection = sentinel
            .detect("a0", &recent, &baseline)
            .await
            .expect("a0 should be anomalous");

        let result = correlator
            .correlate(&infection, &agent_ids, &telemetry, &baseline, &sentinel)
            .await;
        assert_eq!(result.verdict, CorrelationVerdict::AgentSpecific);
    }
}
