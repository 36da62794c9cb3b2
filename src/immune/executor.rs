//! Healing executors: pluggable mechanisms that carry out a chosen
//! [`HealingAction`](super::healing::HealingAction) against a real agent.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Duration;
use tracing::{info, warn};

use super::healing::HealingAction;
use crate::utils::structured_logging::StructuredLogger;

const CONTROL_API_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub action: HealingAction,
    pub agent_id: String,
    pub executor: String,
    pub message: String,
}

impl ExecutionResult {
    fn new(success: bool, action: HealingAction, agent_id: &str, executor: &str, message: impl Into<String>) -> Self {
        Self {
            success,
            action,
            agent_id: agent_id.to_string(),
            executor: executor.to_string(),
            message: message.into(),
        }
    }
}

/// A mechanism capable of carrying out a healing action on an agent.
#[async_trait]
pub trait HealingExecutor: Send + Sync {
    async fn execute(&self, agent_id: &str, action: HealingAction) -> ExecutionResult;

    fn name(&self) -> &'static str;
}

async fn log_and_return(result: ExecutionResult) -> ExecutionResult {
    StructuredLogger::log_healing_event(&result.agent_id, &format!("{:?}", result.action), &result.executor, result.success);
    result
}

/// Modifies nothing real; used by demos and the chaos harness. Always succeeds.
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealingExecutor for SimulatedExecutor {
    async fn execute(&self, agent_id: &str, action: HealingAction) -> ExecutionResult {
        let message = match action {
            HealingAction::ResetMemory => "memory cleared (simulated)",
            HealingAction::RollbackPrompt => "prompt rolled back (simulated)",
            HealingAction::ReduceAutonomy => "autonomy reduced (simulated)",
            HealingAction::RevokeTools => "tools revoked (simulated)",
            HealingAction::ResetAgent => "agent reset to clean state (simulated)",
        };
        log_and_return(ExecutionResult::new(true, action, agent_id, "simulated", message)).await
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Applies healing by injecting policy rules into an LLM request gateway.
/// Rules are held in-memory here; a real deployment would call the gateway's
/// policy-management API.
pub struct GatewayExecutor {
    rules: DashMap<String, String>,
}

impl GatewayExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self { rules: DashMap::new() }
    }
}

impl Default for GatewayExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealingExecutor for GatewayExecutor {
    async fn execute(&self, agent_id: &str, action: HealingAction) -> ExecutionResult {
        let message = match action {
            HealingAction::ReduceAutonomy => {
                self.rules.insert(
                    format!("heal:throttle:{agent_id}"),
                    "max_requests_per_minute=2,max_tokens_per_request=500".to_string(),
                );
                "rate limit injected (2 req/min, 500 tok/req)".to_string()
            }
            HealingAction::RevokeTools => {
                self.rules
                    .insert(format!("heal:no-tools:{agent_id}"), "blocked_models=*".to_string());
                "tool-calling models blocked via gateway policy".to_string()
            }
            HealingAction::ResetMemory => {
                info!(agent_id, "gateway heal reset-memory: header injection queued");
                "X-Clear-Context header injected".to_string()
            }
            HealingAction::RollbackPrompt => {
                warn!(agent_id, "gateway heal rollback-prompt: manual action needed");
                "prompt rollback requires an external prompt registry; operator alerted".to_string()
            }
            HealingAction::ResetAgent => {
                self.rules
                    .insert(format!("heal:block:{agent_id}"), "action_on_violation=block".to_string());
                warn!(agent_id, "gateway heal reset-agent: full block applied");
                "agent fully blocked at gateway; operator must restart the process".to_string()
            }
        };
        log_and_return(ExecutionResult::new(true, action, agent_id, "gateway", message)).await
    }

    fn name(&self) -> &'static str {
        "gateway"
    }
}

fn control_endpoint(action: HealingAction) -> &'static str {
    match action {
        HealingAction::ResetMemory => "/control/reset-memory",
        HealingAction::RollbackPrompt => "/control/rollback-prompt",
        HealingAction::ReduceAutonomy => "/control/reduce-autonomy",
        HealingAction::RevokeTools => "/control/revoke-tools",
        HealingAction::ResetAgent => "/control/restart",
    }
}

/// Heals agents via an HTTP control API the agent process itself exposes.
pub struct ProcessExecutor {
    control_urls: DashMap<String, String>,
    client: reqwest::Client,
}

impl ProcessExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            control_urls: DashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn register_control_url(&self, agent_id: &str, base_url: &str) {
        self.control_urls.insert(agent_id.to_string(), base_url.trim_end_matches('/').to_string());
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealingExecutor for ProcessExecutor {
    async fn execute(&self, agent_id: &str, action: HealingAction) -> ExecutionResult {
        let Some(base) = self.control_urls.get(agent_id).map(|u| u.clone()) else {
            return log_and_return(ExecutionResult::new(
                false,
                action,
                agent_id,
                "process",
                "no control url registered",
            ))
            .await;
        };
        let url = format!("{base}{}", control_endpoint(action));

        let outcome = tokio::time::timeout(CONTROL_API_TIMEOUT, self.client.post(&url).send()).await;
        let result = match outcome {
            Ok(Ok(resp)) if resp.status().is_success() => {
                ExecutionResult::new(true, action, agent_id, "process", format!("control API succeeded (HTTP {})", resp.status()))
            }
            Ok(Ok(resp)) => {
                ExecutionResult::new(false, action, agent_id, "process", format!("control API returned HTTP {}", resp.status()))
            }
            Ok(Err(e)) => ExecutionResult::new(false, action, agent_id, "process", format!("control API call failed: {e}")),
            Err(_) => ExecutionResult::new(false, action, agent_id, "process", "control API call timed out"),
        };
        log_and_return(result).await
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

#[derive(Clone)]
enum ContainerRef {
    Docker { container_id: String },
    Kubernetes { namespace: String, deployment: String },
}

/// Heals agents via container orchestration: `docker restart` or
/// `kubectl rollout restart`. Only [`HealingAction::ResetAgent`] is handled
/// directly; every other action delegates to a fallback executor.
pub struct ContainerExecutor {
    containers: DashMap<String, ContainerRef>,
    fallback: Option<Box<dyn HealingExecutor>>,
}

impl ContainerExecutor {
    #[must_use]
    pub fn new(fallback: Option<Box<dyn HealingExecutor>>) -> Self {
        Self {
            containers: DashMap::new(),
            fallback,
        }
    }

    pub fn register_container(&self, agent_id: &str, container_id: &str) {
        self.containers.insert(
            agent_id.to_string(),
            ContainerRef::Docker {
                container_id: container_id.to_string(),
            },
        );
    }

    pub fn register_k8s(&self, agent_id: &str, namespace: &str, deployment: &str) {
        self.containers.insert(
            agent_id.to_string(),
            ContainerRef::Kubernetes {
                namespace: namespace.to_string(),
                deployment: deployment.to_string(),
            },
        );
    }

    async fn docker_restart(container_id: &str, agent_id: &str) -> ExecutionResult {
        match Command::new("docker").arg("restart").arg(container_id).status().await {
            Ok(status) if status.success() => {
                ExecutionResult::new(true, HealingAction::ResetAgent, agent_id, "container", format!("docker restart {container_id}"))
            }
            Ok(status) => ExecutionResult::new(
                false,
                HealingAction::ResetAgent,
                agent_id,
                "container",
                format!("docker restart {container_id} exited with {status}"),
            ),
            Err(e) => ExecutionResult::new(false, HealingAction::ResetAgent, agent_id, "container", format!("docker not available: {e}")),
        }
    }

    async fn k8s_restart(namespace: &str, deployment: &str, agent_id: &str) -> ExecutionResult {
        match Command::new("kubectl")
            .args(["rollout", "restart", &format!("deployment/{deployment}"), "-n", namespace])
            .status()
            .await
        {
            Ok(status) if status.success() => ExecutionResult::new(
                true,
                HealingAction::ResetAgent,
                agent_id,
                "container",
                format!("kubectl rollout restart deployment/{deployment} -n {namespace}"),
            ),
            Ok(status) => ExecutionResult::new(
                false,
                HealingAction::ResetAgent,
                agent_id,
                "container",
                format!("kubectl rollout restart exited with {status}"),
            ),
            Err(e) => ExecutionResult::new(false, HealingAction::ResetAgent, agent_id, "container", format!("kubectl not available: {e}")),
        }
    }
}

#[async_trait]
impl HealingExecutor for ContainerExecutor {
    async fn execute(&self, agent_id: &str, action: HealingAction) -> ExecutionResult {
        let Some(container) = self.containers.get(agent_id).map(|c| c.clone()) else {
            return match &self.fallback {
                Some(fallback) => fallback.execute(agent_id, action).await,
                None => log_and_return(ExecutionResult::new(false, action, agent_id, "container", "agent not registered")).await,
            };
        };

        if action == HealingAction::ResetAgent {
            let result = match container {
                ContainerRef::Docker { container_id } => Self::docker_restart(&container_id, agent_id).await,
                ContainerRef::Kubernetes { namespace, deployment } => Self::k8s_restart(&namespace, &deployment, agent_id).await,
            };
            return log_and_return(result).await;
        }

        match &self.fallback {
            Some(fallback) => fallback.execute(agent_id, action).await,
            None => {
                log_and_return(ExecutionResult::new(
                    false,
                    action,
                    agent_id,
                    "container",
                    format!("no container handler for {action:?}"),
                ))
                .await
            }
        }
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// A JSON-friendly rollup of executor outcomes, grouped by action, for API consumption.
#[must_use]
pub fn summarize(results: &[ExecutionResult]) -> HashMap<String, usize> {
    let mut summary = HashMap::new();
    for result in results {
        if result.success {
            *summary.entry(format!("{:?}", result.action)).or_insert(0) += 1;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_executor_always_succeeds() {
        let executor = SimulatedExecutor::new();
        let result = executor.execute("a1", HealingAction::ResetMemory).await;
        assert!(result.success);
        assert_eq!(result.executor, "simulated");
    }

    #[tokio::test]
    async fn process_executor_fails_without_registration() {
        let executor = ProcessExecutor::new();
        let result = executor.execute("a1", HealingAction::ResetAgent).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn container_executor_delegates_non_reset_actions_to_fallback() {
        let executor = ContainerExecutor::new(Some(Box::new(SimulatedExecutor::new())));
        executor.register_container("a1", "container-123");
        let result = executor.execute("a1", HealingAction::ResetMemory).await;
        assert!(result.success);
        assert_eq!(result.executor, "simulated");
    }

    #[tokio::test]
    async fn container_executor_falls_back_when_agent_unregistered() {
        let executor = ContainerExecutor::new(Some(Box::new(SimulatedExecutor::new())));
        let result = executor.execute("a1", HealingAction::ResetAgent).await;
        assert!(result.success);
    }
}
