//! Multi-hypothesis diagnosis: map an anomaly report plus fleet context onto an
//! ordered list of probable root causes.
//!
//! This surface is richer than a single best-guess label: every hypothesis the rule
//! set fires is kept (deduplicated by kind, highest confidence wins), ordered most to
//! least likely, so the healer can walk hypotheses in order if the first one's action
//! ladder is exhausted without success.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::correlator::CorrelationVerdict;
use super::sentinel::{AnomalyKind, AnomalyReport};

/// Confidence threshold above which a metric's own deviation (not just its presence
/// in the anomaly set) is required before a rule fires.
const STRONG_DEVIATION_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosisKind {
    PromptInjection,
    PromptDrift,
    CostOverrun,
    InfiniteLoop,
    ToolInstability,
    MemoryCorruption,
    ExternalCause,
    Unknown,
}

/// One probable root cause with a confidence in `[0, 1]` and human-readable reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub kind: DiagnosisKind,
    pub confidence: f64,
    pub reasoning: String,
}

/// Ordered hypotheses for one infection, most likely first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisResult {
    pub hypotheses: Vec<Hypothesis>,
}

impl DiagnosisResult {
    /// The most likely hypothesis, if any fired.
    #[must_use]
    pub fn primary(&self) -> Option<&Hypothesis> {
        self.hypotheses.first()
    }
}

/// Fleet-correlation context supplied alongside the raw anomaly for diagnosis.
#[derive(Debug, Clone)]
pub struct DiagnosisContext {
    pub verdict: CorrelationVerdict,
    pub affected_fraction: f64,
}

/// An operator's assessment of a past diagnosis, used to bias future confidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum DiagnosisFeedback {
    FalsePositive,
    WrongDiagnosis,
}

/// Deterministic rule engine producing ranked hypotheses, with a per-kind confidence
/// bias learned from operator feedback.
pub struct Diagnostician {
    bias: DashMap<DiagnosisKind, f64>,
}

impl Diagnostician {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bias: DashMap::new(),
        }
    }

    /// Record operator feedback on a past diagnosis kind: decreases that kind's future
    /// confidence (false positives more aggressively than a merely-wrong diagnosis).
    pub fn record_feedback(&self, kind: DiagnosisKind, feedback: DiagnosisFeedback) {
        let delta = match feedback {
            DiagnosisFeedback::FalsePositive => -0.05,
            DiagnosisFeedback::WrongDiagnosis => -0.03,
        };
        let mut entry = self.bias.entry(kind).or_insert(0.0);
        *entry += delta;
    }

    fn biased(&self, kind: DiagnosisKind, confidence: f64) -> f64 {
        let bias = self.bias.get(&kind).map_or(0.0, |b| *b);
        (confidence + bias).clamp(0.05, 1.0)
    }

    fn push(&self, out: &mut Vec<Hypothesis>, kind: DiagnosisKind, confidence: f64, reasoning: impl Into<String>) {
        out.push(Hypothesis {
            kind,
            confidence: self.biased(kind, confidence),
            reasoning: reasoning.into(),
        });
    }

    /// Produce ranked hypotheses for `infection` given the fleet correlation context.
    #[must_use]
    pub fn diagnose(&self, infection: &AnomalyReport, context: &DiagnosisContext) -> DiagnosisResult {
        let mut hypotheses = Vec::new();
        let dev = |kind: AnomalyKind| infection.deviations.get(&kind).copied().unwrap_or(0.0);
        let has = |kind: AnomalyKind| infection.contains(kind);

        if context.verdict == CorrelationVerdict::FleetWide {
            self.push(
                &mut hypotheses,
                DiagnosisKind::ExternalCause,
                0.90,
                format!(
                    "{:.0}% of the monitored fleet shows overlapping anomalies; likely an external cause",
                    context.affected_fraction * 100.0
                ),
            );
        }

        if has(AnomalyKind::PromptChange) {
            if has(AnomalyKind::InputTokenSpike) {
                self.push(
                    &mut hypotheses,
                    DiagnosisKind::PromptInjection,
                    0.95,
                    "prompt hash changed alongside an input token spike",
                );
            } else {
                self.push(
                    &mut hypotheses,
                    DiagnosisKind::PromptInjection,
                    0.80,
                    "prompt hash changed from the learned baseline",
                );
                self.push(
                    &mut hypotheses,
                    DiagnosisKind::PromptDrift,
                    0.80 * 0.6,
                    "prompt hash changed; could be a benign prompt update",
                );
            }
        } else if has(AnomalyKind::InputTokenSpike) && dev(AnomalyKind::InputTokenSpike) > STRONG_DEVIATION_THRESHOLD {
            self.push(
                &mut hypotheses,
                DiagnosisKind::PromptInjection,
                0.85,
                "input tokens spiked sharply with no observed prompt change",
            );
        }

        if has(AnomalyKind::OutputTokenSpike) && dev(AnomalyKind::OutputTokenSpike) > STRONG_DEVIATION_THRESHOLD {
            self.push(
                &mut hypotheses,
                DiagnosisKind::PromptDrift,
                0.85,
                "output tokens spiked sharply above baseline",
            );
        }

        if has(AnomalyKind::TokenSpike) && dev(AnomalyKind::TokenSpike) > STRONG_DEVIATION_THRESHOLD {
            self.push(
                &mut hypotheses,
                DiagnosisKind::PromptDrift,
                0.85,
                "total token usage spiked sharply above baseline",
            );
        }

        if has(AnomalyKind::CostSpike) {
            self.push(
                &mut hypotheses,
                DiagnosisKind::CostOverrun,
                0.80,
                "cost per execution spiked above baseline",
            );
        }

        if has(AnomalyKind::ToolExplosion) && dev(AnomalyKind::ToolExplosion) > STRONG_DEVIATION_THRESHOLD {
            self.push(
                &mut hypotheses,
                DiagnosisKind::InfiniteLoop,
                0.90,
                "tool-call count spiked sharply, consistent with a tool-call loop",
            );
        }

        if has(AnomalyKind::LatencySpike) {
            if has(AnomalyKind::ErrorRateSpike) || has(AnomalyKind::HighRetryRate) {
                self.push(
                    &mut hypotheses,
                    DiagnosisKind::ToolInstability,
                    0.75,
                    "latency spiked alongside elevated errors or retries",
                );
            } else {
                self.push(
                    &mut hypotheses,
                    DiagnosisKind::ToolInstability,
                    0.60,
                    "latency spiked in isolation",
                );
            }
        }

        if has(AnomalyKind::HighRetryRate)
            && !has(AnomalyKind::LatencySpike)
            && !has(AnomalyKind::ErrorRateSpike)
        {
            self.push(
                &mut hypotheses,
                DiagnosisKind::MemoryCorruption,
                0.65,
                "elevated retry rate with no other accompanying anomaly",
            );
        }

        if hypotheses.is_empty() {
            self.push(
                &mut hypotheses,
                DiagnosisKind::Unknown,
                0.30,
                "anomaly detected but no rule matched a specific cause",
            );
        }

        hypotheses.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen = std::collections::HashSet::new();
        hypotheses.retain(|h| seen.insert(h.kind));

        DiagnosisResult { hypotheses }
    }
}

impl Default for Diagnostician {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn report(kinds: &[(AnomalyKind, f64)]) -> AnomalyReport {
        let deviations: HashMap<AnomalyKind, f64> = kinds.iter().copied().collect();
        let max_deviation = deviations.values().copied().fold(f64::MIN, f64::max);
        AnomalyReport {
            agent_id: "a1".to_string(),
            kinds: deviations.keys().copied().collect(),
            deviations,
            max_deviation,
        }
    }

    fn ctx() -> DiagnosisContext {
        DiagnosisContext {
            verdict: CorrelationVerdict::AgentSpecific,
            affected_fraction: 0.0,
        }
    }

    #[test]
    fn tool_explosion_yields_infinite_loop_as_primary() {
        let diagnostician = Diagnostician::new();
        let infection = report(&[(AnomalyKind::ToolExplosion, 4.0)]);
        let result = diagnostician.diagnose(&infection, &ctx());
        let primary = result.primary().expect("should have a hypothesis");
        assert_eq!(primary.kind, DiagnosisKind::InfiniteLoop);
    }

    #[test]
    fn fleet_wide_prepends_external_cause() {
        let diagnostician = Diagnostician::new();
        let infection = report(&[(AnomalyKind::LatencySpike, 3.0)]);
        let context = DiagnosisContext {
            verdict: CorrelationVerdict::FleetWide,
            affected_fraction: 0.5,
        };
        let result = diagnostician.diagnose(&infection, &context);
        let primary = result.primary().expect("should have a hypothesis");
        assert_eq!(primary.kind, DiagnosisKind::ExternalCause);
    }

    #[test]
    fn prompt_change_with_input_spike_is_high_confidence_injection() {
        let diagnostician = Diagnostician::new();
        let infection = report(&[
            (AnomalyKind::PromptChange, 10.0),
            (AnomalyKind::InputTokenSpike, 4.0),
        ]);
        let result = diagnostician.diagnose(&infection, &ctx());
        let primary = result.primary().expect("should have a hypothesis");
        assert_eq!(primary.kind, DiagnosisKind::PromptInjection);
        assert!((primary.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn unknown_when_no_rule_matches() {
        let diagnostician = Diagnostician::new();
        let infection = report(&[(AnomalyKind::HighRetryRate, 0.1)]);
        let result = diagnostician.diagnose(&infection, &ctx());
        // lone HIGH_RETRY_RATE still matches memory-corruption rule; use an empty set instead.
        let _ = result;
        let empty_kinds: HashMap<AnomalyKind, f64> = HashMap::new();
        let infection = AnomalyReport {
            agent_id: "a1".to_string(),
            kinds: Vec::new(),
            deviations: empty_kinds,
            max_deviation: 0.0,
        };
        let result = diagnostician.diagnose(&infection, &ctx());
        assert_eq!(result.primary().expect("should have a hypothesis").kind, DiagnosisKind::Unknown);
    }

    #[test]
    fn feedback_lowers_future_confidence() {
        let diagnostician = Diagnostician::new();
        diagnostician.record_feedback(DiagnosisKind::InfiniteLoop, DiagnosisFeedback::FalsePositive);
        let infection = report(&[(AnomalyKind::ToolExplosion, 4.0)]);
        let result = diagnostician.diagnose(&infection, &ctx());
        let primary = result.primary().expect("should have a hypothesis");
        assert!((primary.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn hypotheses_are_deduplicated_keeping_highest_confidence() {
        let diagnostician = Diagnostician::new();
        let infection = report(&[
            (AnomalyKind::TokenSpike, 4.0),
            (AnomalyKind::OutputTokenSpike, 4.0),
        ]);
        let result = diagnostician.diagnose(&infection, &ctx());
        let drift_count = result
            .hypotheses
            .iter()
            .filter(|h| h.kind == DiagnosisKind::PromptDrift)
            .count();
        assert_eq!(drift_count, 1);
    }
}
