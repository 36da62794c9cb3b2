//! Adaptive memory: what healing actions have worked or failed, fleet-wide and
//! per-agent, so the healer's policy ladders improve with experience instead of
//! retrying dead ends forever.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::diagnosis::DiagnosisKind;
use super::healing::HealingAction;

/// One attempted healing action and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingRecord {
    pub agent_id: String,
    pub diagnosis: DiagnosisKind,
    pub action: HealingAction,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// An operator's note on a past diagnosis, used to inform future confidence biasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub diagnosis: DiagnosisKind,
    pub actual_cause: String,
    pub notes: String,
    pub timestamp: DateTime<Utc>,
}

/// Negative learning (what has failed for a specific agent + diagnosis) and positive
/// learning (what has globally succeeded for a diagnosis, fleet-wide).
pub struct ImmuneMemory {
    failed: DashMap<(String, DiagnosisKind), HashSet<HealingAction>>,
    successes: DashMap<DiagnosisKind, HashMap<HealingAction, u64>>,
    failures: DashMap<DiagnosisKind, HashMap<HealingAction, u64>>,
    history: RwLock<Vec<HealingRecord>>,
    feedback: RwLock<Vec<FeedbackEntry>>,
}

impl ImmuneMemory {
    #[must_use]
    pub fn new() -> Self {
        Self {
            failed: DashMap::new(),
            successes: DashMap::new(),
            failures: DashMap::new(),
            history: RwLock::new(Vec::new()),
            feedback: RwLock::new(Vec::new()),
        }
    }

    /// Record a healing attempt's outcome, updating both the negative (per-agent)
    /// and positive (fleet-wide) learning structures.
    pub async fn record(&self, record: HealingRecord) {
        if !record.success {
            self.failed
                .entry((record.agent_id.clone(), record.diagnosis))
                .or_default()
                .insert(record.action);
        }

        let counts = if record.success {
            &self.successes
        } else {
            &self.failures
        };
        *counts
            .entry(record.diagnosis)
            .or_default()
            .entry(record.action)
            .or_insert(0) += 1;

        self.history.write().await.push(record);
    }

    /// Actions already known to have failed for this `(agent, diagnosis)` pair.
    #[must_use]
    pub fn failed_actions(&self, agent_id: &str, diagnosis: DiagnosisKind) -> HashSet<HealingAction> {
        self.failed
            .get(&(agent_id.to_string(), diagnosis))
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Actions for this diagnosis ordered by global success count, descending.
    #[must_use]
    pub fn success_ranked_actions(&self, diagnosis: DiagnosisKind) -> Vec<(HealingAction, u64)> {
        let Some(counts) = self.successes.get(&diagnosis) else {
            return Vec::new();
        };
        let mut ranked: Vec<(HealingAction, u64)> = counts.iter().map(|(a, c)| (*a, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub async fn record_feedback(&self, entry: FeedbackEntry) {
        self.feedback.write().await.push(entry);
    }

    pub async fn history(&self) -> Vec<HealingRecord> {
        self.history.read().await.clone()
    }

    pub async fn total_healings(&self) -> usize {
        self.history.read().await.len()
    }

    pub async fn healing_success_rate(&self) -> f64 {
        let history = self.history.read().await;
        if history.is_empty() {
            return 0.0;
        }
        let successes = history.iter().filter(|r| r.success).count();
        successes as f64 / history.len() as f64
    }

    /// A JSON-friendly summary of learned success/failure patterns, for API consumption.
    pub async fn pattern_summary(&self) -> serde_json::Value {
        let mut patterns = serde_json::Map::new();
        for entry in &self.successes {
            let key = format!("{:?}", entry.key());
            let counts: HashMap<String, u64> = entry
                .value()
                .iter()
                .map(|(action, count)| (format!("{action:?}"), *count))
                .collect();
            patterns.insert(key, serde_json::json!({ "successes": counts }));
        }
        serde_json::Value::Object(patterns)
    }
}

impl Default for ImmuneMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent: &str, diagnosis: DiagnosisKind, action: HealingAction, success: bool) -> HealingRecord {
        HealingRecord {
            agent_id: agent.to_string(),
            diagnosis,
            action,
            success,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn failed_action_is_remembered_per_agent_and_diagnosis() {
        let memory = ImmuneMemory::new();
        memory
            .record(record("a1", DiagnosisKind::InfiniteLoop, HealingAction::RevokeTools, false))
            .await;
        let failed = memory.failed_actions("a1", DiagnosisKind::InfiniteLoop);
        assert!(failed.contains(&HealingAction::RevokeTools));
        assert!(memory.failed_actions("a2", DiagnosisKind::InfiniteLoop).is_empty());
    }

    #[tokio::test]
    async fn success_counts_reorder_globally() {
        let memory = ImmuneMemory::new();
        memory
            .record(record("a1", DiagnosisKind::InfiniteLoop, HealingAction::RevokeTools, true))
            .await;
        memory
            .record(record("a2", DiagnosisKind::InfiniteLoop, HealingAction::RevokeTools, true))
            .await;
        memory
            .record(record("a3", DiagnosisKind::InfiniteLoop, HealingAction::ResetMemory, true))
            .await;
        let ranked = memory.success_ranked_actions(DiagnosisKind::InfiniteLoop);
        assert_eq!(ranked[0].0, HealingAction::RevokeTools);
        assert_eq!(ranked[0].1, 2);
    }

    #[tokio::test]
    async fn success_rate_reflects_history() {
        let memory = ImmuneMemory::new();
        memory
            .record(record("a1", DiagnosisKind::Unknown, HealingAction::ResetMemory, true))
            .await;
        memory
            .record(record("a1", DiagnosisKind::Unknown, HealingAction::ResetAgent, false))
            .await;
        assert!((memory.healing_success_rate().await - 0.5).abs() < 1e-9);
        assert_eq!(memory.total_healings().await, 2);
    }
}
