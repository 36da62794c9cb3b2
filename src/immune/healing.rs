//! Policy ladders: for each diagnosis kind, a static ordered list of recovery
//! actions from least to most disruptive, and the selection logic that walks it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::diagnosis::DiagnosisKind;
use super::memory::ImmuneMemory;

/// One step on a recovery ladder, ordered roughly least to most disruptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealingAction {
    ResetMemory,
    RollbackPrompt,
    ReduceAutonomy,
    RevokeTools,
    ResetAgent,
}

/// The static action ladder for one diagnosis kind. Every ladder ends with
/// `ResetAgent` and contains no duplicates.
#[must_use]
pub fn policy_ladder(diagnosis: DiagnosisKind) -> &'static [HealingAction] {
    use HealingAction::{ReduceAutonomy, ResetAgent, ResetMemory, RevokeTools, RollbackPrompt};
    match diagnosis {
        DiagnosisKind::PromptDrift => &[ResetMemory, RollbackPrompt, ReduceAutonomy, ResetAgent],
        DiagnosisKind::PromptInjection => &[RevokeTools, ResetMemory, RollbackPrompt, ResetAgent],
        DiagnosisKind::InfiniteLoop => &[RevokeTools, ReduceAutonomy, ResetMemory, ResetAgent],
        DiagnosisKind::CostOverrun => &[ReduceAutonomy, RollbackPrompt, ResetMemory, ResetAgent],
        DiagnosisKind::ExternalCause => &[ReduceAutonomy, ResetAgent],
        DiagnosisKind::ToolInstability => &[ResetMemory, ReduceAutonomy, RevokeTools, ResetAgent],
        DiagnosisKind::MemoryCorruption => &[ResetMemory, RollbackPrompt, ResetAgent],
        DiagnosisKind::Unknown => &[ResetMemory, ReduceAutonomy, ResetAgent],
    }
}

/// Selects the next healing action for a diagnosis, skipping actions already known
/// to have failed for this agent and preferring actions with a good global track record.
pub struct Healer;

impl Healer {
    /// Pick the next action to try for `(agent_id, diagnosis)`, given the actions
    /// already known to have failed and the fleet-wide success/failure memory.
    #[must_use]
    pub fn next_action(
        agent_id: &str,
        diagnosis: DiagnosisKind,
        memory: &ImmuneMemory,
    ) -> Option<HealingAction> {
        let failed: HashSet<HealingAction> = memory.failed_actions(agent_id, diagnosis);
        let ladder = policy_ladder(diagnosis);
        let candidates: Vec<HealingAction> = ladder.iter().copied().filter(|a| !failed.contains(a)).collect();
        if candidates.is_empty() {
            return None;
        }

        let ranked_successes = memory.success_ranked_actions(diagnosis);
        let mut ordered: Vec<HealingAction> = ranked_successes
            .into_iter()
            .map(|(action, _)| action)
            .filter(|a| candidates.contains(a))
            .collect();
        for action in &candidates {
            if !ordered.contains(action) {
                ordered.push(*action);
            }
        }

        ordered.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::immune::memory::HealingRecord;
    use chrono::Utc;
    use rstest::rstest;

    #[rstest]
    #[case(DiagnosisKind::PromptDrift)]
    #[case(DiagnosisKind::PromptInjection)]
    #[case(DiagnosisKind::InfiniteLoop)]
    #[case(DiagnosisKind::CostOverrun)]
    #[case(DiagnosisKind::ExternalCause)]
    #[case(DiagnosisKind::ToolInstability)]
    #[case(DiagnosisKind::MemoryCorruption)]
    #[case(DiagnosisKind::Unknown)]
    fn every_ladder_is_nonempty_has_no_duplicates_and_ends_with_reset_agent(#[case] diagnosis: DiagnosisKind) {
        let ladder = policy_ladder(diagnosis);
        assert!(!ladder.is_empty());
        let unique: HashSet<_> = ladder.iter().collect();
        assert_eq!(unique.len(), ladder.len());
        assert_eq!(*ladder.last().expect("ladder is non-empty"), HealingAction::ResetAgent);
    }

    #[tokio::test]
    async fn skips_actions_already_failed_for_this_agent() {
        let memory = ImmuneMemory::new();
        memory
            .record(HealingRecord {
                agent_id: "a1".to_string(),
                diagnosis: DiagnosisKind::InfiniteLoop,
                action: HealingAction::RevokeTools,
                success: false,
                timestamp: Utc::now(),
            })
            .await;
        let next = Healer::next_action("a1", DiagnosisKind::InfiniteLoop, &memory);
        assert_eq!(next, Some(HealingAction::ReduceAutonomy));
    }

    #[tokio::test]
    async fn prefers_globally_successful_action() {
        let memory = ImmuneMemory::new();
        memory
            .record(HealingRecord {
                agent_id: "a2".to_string(),
                diagnosis: DiagnosisKind::InfiniteLoop,
                action: HealingAction::ResetMemory,
                success: true,
                timestamp: Utc::now(),
            })
            .await;
        let next = Healer::next_action("a1", DiagnosisKind::InfiniteLoop, &memory);
        assert_eq!(next, Some(HealingAction::ResetMemory));
    }

    #[tokio::test]
    async fn returns_none_once_ladder_exhausted() {
        let memory = ImmuneMemory::new();
        for action in policy_ladder(DiagnosisKind::ExternalCause) {
            memory
                .record(HealingRecord {
                    agent_id: "a1".to_string(),
                    diagnosis: DiagnosisKind::ExternalCause,
                    action: *action,
                    success: false,
                    timestamp: Utc::now(),
                })
                .await;
        }
        assert_eq!(Healer::next_action("a1", DiagnosisKind::ExternalCause, &memory), None);
    }
}
