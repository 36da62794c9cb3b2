//! Quarantine: isolate an infected agent through a pluggable enforcement
//! backend, tracking quarantine/drain state in memory regardless of whether
//! the backend call actually succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::error;

use super::enforcement::{EnforcementAction, EnforcementResult, EnforcementStrategy, NoOpEnforcement};

/// Tracks which agents are quarantined or draining and delegates the actual
/// blocking mechanism to an [`EnforcementStrategy`].
pub struct QuarantineController {
    enforcement: Arc<dyn EnforcementStrategy>,
    quarantined: DashMap<String, DateTime<Utc>>,
    draining: DashMap<String, ()>,
    total_quarantines: std::sync::atomic::AtomicU64,
}

impl QuarantineController {
    #[must_use]
    pub fn new(enforcement: Arc<dyn EnforcementStrategy>) -> Self {
        Self {
            enforcement,
            quarantined: DashMap::new(),
            draining: DashMap::new(),
            total_quarantines: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn mark_quarantined(&self, agent_id: &str) {
        if !self.quarantined.contains_key(agent_id) {
            self.quarantined.insert(agent_id.to_string(), Utc::now());
            self.total_quarantines.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        self.draining.remove(agent_id);
    }

    fn mark_released(&self, agent_id: &str) {
        self.quarantined.remove(agent_id);
        self.draining.remove(agent_id);
    }

    /// Block the agent at the enforcement layer and mark it quarantined. The
    /// in-memory state is marked quarantined even if enforcement reports
    /// failure, since the lifecycle must still treat the agent as isolated.
    pub async fn quarantine(&self, agent_id: &str) -> EnforcementResult {
        let result = self.enforcement.apply(agent_id, EnforcementAction::Block).await;
        if !result.success {
            error!(agent_id, detail = %result.detail, "enforcement block failed; marking quarantined anyway");
        }
        self.mark_quarantined(agent_id);
        result
    }

    /// Start draining: stop new requests, let in-flight ones finish, then
    /// settle into a full quarantine.
    pub async fn drain(&self, agent_id: &str) -> EnforcementResult {
        self.draining.insert(agent_id.to_string(), ());
        let result = self.enforcement.apply(agent_id, EnforcementAction::Drain).await;
        self.draining.remove(agent_id);
        self.mark_quarantined(agent_id);
        result
    }

    pub async fn release(&self, agent_id: &str) -> EnforcementResult {
        let result = self.enforcement.apply(agent_id, EnforcementAction::Unblock).await;
        self.mark_released(agent_id);
        result
    }

    #[must_use]
    pub fn is_quarantined(&self, agent_id: &str) -> bool {
        self.quarantined.contains_key(agent_id)
    }

    #[must_use]
    pub fn is_draining(&self, agent_id: &str) -> bool {
        self.draining.contains_key(agent_id)
    }

    #[must_use]
    pub fn quarantine_duration_seconds(&self, agent_id: &str) -> f64 {
        self.quarantined
            .get(agent_id)
            .map(|since| (Utc::now() - *since).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    #[must_use]
    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }

    #[must_use]
    pub fn all_quarantined(&self) -> HashSet<String> {
        self.quarantined.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn total_quarantines(&self) -> u64 {
        self.total_quarantines.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Default for QuarantineController {
    fn default() -> Self {
        Self::new(Arc::new(NoOpEnforcement::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn quarantine_marks_agent_isolated_and_counts_it_once() {
        let controller = QuarantineController::default();
        controller.quarantine("a1").await;
        controller.quarantine("a1").await;
        assert!(controller.is_quarantined("a1"));
        assert_eq!(controller.total_quarantines(), 1);
        assert_eq!(controller.quarantined_count(), 1);
    }

    #[tokio::test]
    async fn drain_then_settles_into_quarantine() {
        let controller = QuarantineController::default();
        controller.drain("a1").await;
        assert!(!controller.is_draining("a1"));
        assert!(controller.is_quarantined("a1"));
    }

    #[tokio::test]
    async fn release_clears_quarantine_state() {
        let controller = QuarantineController::default();
        controller.quarantine("a1").await;
        controller.release("a1").await;
        assert!(!controller.is_quarantined("a1"));
        assert_eq!(controller.quarantine_duration_seconds("a1"), 0.0);
    }
}
