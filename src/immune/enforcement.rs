//! Enforcement backends: the mechanisms that physically block, unblock, drain,
//! or health-check a running agent, independent of which healing action is applied.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::warn;

use crate::utils::structured_logging::StructuredLogger;

/// Default per-call timeout for enforcement backends that perform real I/O.
pub const DEFAULT_ENFORCEMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnforcementAction {
    Block,
    Unblock,
    Drain,
    HealthCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementResult {
    pub success: bool,
    pub detail: String,
}

impl EnforcementResult {
    #[must_use]
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// A mechanism that can physically block/unblock/drain an agent, or answer a
/// health-check about it.
#[async_trait]
pub trait EnforcementStrategy: Send + Sync {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult;

    fn name(&self) -> &'static str;
}

async fn with_timeout(
    backend: &'static str,
    fut: impl std::future::Future<Output = EnforcementResult> + Send,
) -> EnforcementResult {
    match tokio::time::timeout(DEFAULT_ENFORCEMENT_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!(backend, "enforcement call timed out");
            EnforcementResult::failed(format!("{backend} enforcement call timed out"))
        }
    }
}

/// Injects or removes a per-agent blocking policy rule in the request gateway.
/// Rules are held in-memory here; a production deployment would push them to the
/// gateway's control API.
pub struct GatewayEnforcement {
    blocked: DashSetLike,
    gateway_url: Option<String>,
    client: reqwest::Client,
}

/// A tiny `DashSet`-shaped wrapper; `dashmap` ships `DashMap` but not `DashSet` directly
/// usable with a unit value ergonomically, so this keeps the call sites readable.
struct DashSetLike(DashMap<String, ()>);

impl DashSetLike {
    fn new() -> Self {
        Self(DashMap::new())
    }
    fn insert(&self, key: String) {
        self.0.insert(key, ());
    }
    fn remove(&self, key: &str) {
        self.0.remove(key);
    }
    fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
}

impl GatewayEnforcement {
    #[must_use]
    pub fn new(gateway_url: Option<String>) -> Self {
        Self {
            blocked: DashSetLike::new(),
            gateway_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EnforcementStrategy for GatewayEnforcement {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult {
        let result = match action {
            EnforcementAction::Block => {
                self.blocked.insert(agent_id.to_string());
                if let Some(url) = &self.gateway_url {
                    let endpoint = format!("{url}/policy/block/{agent_id}");
                    with_timeout("gateway", async {
                        match self.client.post(&endpoint).send().await {
                            Ok(resp) if resp.status().is_success() => {
                                EnforcementResult::ok("blocking policy rule injected")
                            }
                            Ok(resp) => EnforcementResult::failed(format!(
                                "gateway returned status {}",
                                resp.status()
                            )),
                            Err(e) => EnforcementResult::failed(format!("gateway request failed: {e}")),
                        }
                    })
                    .await
                } else {
                    EnforcementResult::ok("blocking policy rule injected (in-memory)")
                }
            }
            EnforcementAction::Unblock => {
                self.blocked.remove(agent_id);
                EnforcementResult::ok("blocking policy rule removed")
            }
            EnforcementAction::Drain => EnforcementResult::ok("drain policy applied at gateway"),
            EnforcementAction::HealthCheck => EnforcementResult::ok(if self.blocked.contains(agent_id) {
                "agent is blocked"
            } else {
                "agent is not blocked"
            }),
        };
        StructuredLogger::log_enforcement_event(agent_id, &format!("{action:?}"), "gateway", result.success);
        result
    }

    fn name(&self) -> &'static str {
        "gateway"
    }
}

/// Sends platform stop/continue signals to a registered process id.
pub struct ProcessEnforcement {
    pids: DashMap<String, u32>,
}

impl ProcessEnforcement {
    #[must_use]
    pub fn new() -> Self {
        Self { pids: DashMap::new() }
    }

    pub fn register_pid(&self, agent_id: &str, pid: u32) {
        self.pids.insert(agent_id.to_string(), pid);
    }

    async fn signal(&self, pid: u32, signal: &str) -> EnforcementResult {
        with_timeout("process", async move {
            match Command::new("kill")
                .arg(signal)
                .arg(pid.to_string())
                .status()
                .await
            {
                Ok(status) if status.success() => EnforcementResult::ok(format!("sent {signal} to pid {pid}")),
                Ok(status) => EnforcementResult::failed(format!("kill exited with {status}")),
                Err(e) => EnforcementResult::failed(format!("failed to invoke kill: {e}")),
            }
        })
        .await
    }
}

impl Default for ProcessEnforcement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnforcementStrategy for ProcessEnforcement {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult {
        let Some(pid) = self.pids.get(agent_id).map(|p| *p) else {
            return EnforcementResult::failed("no registered pid for agent");
        };
        let result = match action {
            EnforcementAction::Block => self.signal(pid, "-STOP").await,
            EnforcementAction::Unblock => self.signal(pid, "-CONT").await,
            EnforcementAction::Drain => self.signal(pid, "-USR1").await,
            EnforcementAction::HealthCheck => {
                with_timeout("process", async move {
                    match Command::new("kill").arg("-0").arg(pid.to_string()).status().await {
                        Ok(status) if status.success() => EnforcementResult::ok("process is alive"),
                        _ => EnforcementResult::failed("process is not alive"),
                    }
                })
                .await
            }
        };
        StructuredLogger::log_enforcement_event(agent_id, &format!("{action:?}"), "process", result.success);
        result
    }

    fn name(&self) -> &'static str {
        "process"
    }
}

/// Pauses/unpauses a Docker container, or scales a Kubernetes deployment's
/// replicas between 1 and 0.
pub struct ContainerEnforcement {
    containers: DashMap<String, String>,
}

impl ContainerEnforcement {
    #[must_use]
    pub fn new() -> Self {
        Self {
            containers: DashMap::new(),
        }
    }

    pub fn register_container(&self, agent_id: &str, container_name: &str) {
        self.containers.insert(agent_id.to_string(), container_name.to_string());
    }

    async fn docker(&self, container: &str, action: &str) -> EnforcementResult {
        with_timeout("container", async move {
            match Command::new("docker").arg(action).arg(container).status().await {
                Ok(status) if status.success() => EnforcementResult::ok(format!("docker {action} {container}")),
                Ok(status) => EnforcementResult::failed(format!("docker {action} exited with {status}")),
                Err(e) => EnforcementResult::failed(format!("failed to invoke docker: {e}")),
            }
        })
        .await
    }
}

impl Default for ContainerEnforcement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnforcementStrategy for ContainerEnforcement {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult {
        let Some(container) = self.containers.get(agent_id).map(|c| c.clone()) else {
            return EnforcementResult::failed("no registered container for agent");
        };
        let result = match action {
            EnforcementAction::Block => self.docker(&container, "pause").await,
            EnforcementAction::Unblock => self.docker(&container, "unpause").await,
            EnforcementAction::Drain => EnforcementResult::ok("container drain is a no-op; relying on pause"),
            EnforcementAction::HealthCheck => self.docker(&container, "inspect").await,
        };
        StructuredLogger::log_enforcement_event(agent_id, &format!("{action:?}"), "container", result.success);
        result
    }

    fn name(&self) -> &'static str {
        "container"
    }
}

/// Tries each strategy in order; the first success wins.
pub struct CompositeEnforcement {
    strategies: Vec<Box<dyn EnforcementStrategy>>,
}

impl CompositeEnforcement {
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn EnforcementStrategy>>) -> Self {
        Self { strategies }
    }
}

#[async_trait]
impl EnforcementStrategy for CompositeEnforcement {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult {
        let mut last = EnforcementResult::failed("no enforcement strategies configured");
        for strategy in &self.strategies {
            last = strategy.apply(agent_id, action).await;
            if last.success {
                return last;
            }
        }
        last
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

/// In-memory-only strategy; used for tests and simulations.
pub struct NoOpEnforcement {
    blocked: DashSetLike,
}

impl NoOpEnforcement {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocked: DashSetLike::new(),
        }
    }
}

impl Default for NoOpEnforcement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnforcementStrategy for NoOpEnforcement {
    async fn apply(&self, agent_id: &str, action: EnforcementAction) -> EnforcementResult {
        match action {
            EnforcementAction::Block => {
                self.blocked.insert(agent_id.to_string());
                EnforcementResult::ok("blocked (no-op)")
            }
            EnforcementAction::Unblock => {
                self.blocked.remove(agent_id);
                EnforcementResult::ok("unblocked (no-op)")
            }
            EnforcementAction::Drain => EnforcementResult::ok("drained (no-op)"),
            EnforcementAction::HealthCheck => EnforcementResult::ok(if self.blocked.contains(agent_id) {
                "agent is blocked (no-op)"
            } else {
                "agent is not blocked (no-op)"
            }),
        }
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// A set re-exported for callers that only need membership semantics without
/// pulling in the rest of `enforcement`'s backend machinery.
pub type BlockedSet = HashSet<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_tracks_block_state_in_memory() {
        let strategy = NoOpEnforcement::new();
        let result = strategy.apply("a1", EnforcementAction::Block).await;
        assert!(result.success);
        let check = strategy.apply("a1", EnforcementAction::HealthCheck).await;
        assert!(check.detail.contains("blocked"));
        strategy.apply("a1", EnforcementAction::Unblock).await;
        let check = strategy.apply("a1", EnforcementAction::HealthCheck).await;
        assert!(check.detail.contains("not blocked"));
    }

    #[tokio::test]
    async fn composite_tries_in_order_until_success() {
        let strategy = CompositeEnforcement::new(vec![
            Box::new(ProcessEnforcement::new()),
            Box::new(NoOpEnforcement::new()),
        ]);
        let result = strategy.apply("a1", EnforcementAction::Block).await;
        assert!(result.success);
    }
}
