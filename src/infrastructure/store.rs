//! Persistence store: an abstract interface over a time-series/event backend so the
//! core pipeline doesn't hard-depend on SQLite. Every operation carries an implicit
//! run identifier (set at construction) so multiple control-plane instances can share
//! a backend file without cross-contaminating each other's history.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::immune::baseline::BaselineProfile;
use crate::immune::diagnosis::DiagnosisKind;
use crate::immune::healing::HealingAction;
use crate::immune::telemetry::AgentVitals;
use crate::utils::error::{ImmuneError, ImmuneResult};

/// One row of the append-only healing action log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub action_type: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// A snapshot of approval state for one agent; only the latest per agent matters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalState {
    pub agent_id: String,
    pub decision: String,
    pub max_deviation: f64,
    pub anomalies: Vec<String>,
    pub diagnosis_type: String,
    pub reasoning: String,
    pub infection_payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Abstract persistence backend. All operations are scoped to the store's run id
/// internally; callers never pass one explicitly.
#[async_trait]
pub trait Store: Send + Sync {
    async fn write_vitals(&self, vitals: &AgentVitals) -> ImmuneResult<()>;
    async fn recent_vitals(&self, agent_id: &str, window_secs: i64) -> ImmuneResult<Vec<AgentVitals>>;
    async fn all_vitals(&self, agent_id: &str) -> ImmuneResult<Vec<AgentVitals>>;
    async fn latest_vitals(&self, agent_id: &str) -> ImmuneResult<Option<AgentVitals>>;
    async fn execution_count(&self, agent_id: &str) -> ImmuneResult<u64>;
    async fn total_executions(&self) -> ImmuneResult<u64>;

    async fn write_baseline(&self, profile: &BaselineProfile) -> ImmuneResult<()>;
    async fn get_baseline(&self, agent_id: &str) -> ImmuneResult<Option<BaselineProfile>>;
    async fn count_baselines(&self) -> ImmuneResult<u64>;

    async fn write_infection_event(
        &self,
        agent_id: &str,
        max_deviation: f64,
        anomalies: &[String],
        diagnosis_type: &str,
    ) -> ImmuneResult<()>;
    async fn write_quarantine_event(&self, agent_id: &str, action: &str, duration_s: f64) -> ImmuneResult<()>;

    async fn write_approval_event(&self, state: &ApprovalState) -> ImmuneResult<()>;
    async fn latest_approval_state(&self, agent_id: &str) -> ImmuneResult<Option<ApprovalState>>;
    async fn pending_approvals(&self) -> ImmuneResult<Vec<ApprovalState>>;
    async fn rejected_approvals(&self) -> ImmuneResult<Vec<ApprovalState>>;

    async fn write_healing_event(
        &self,
        agent_id: &str,
        diagnosis: DiagnosisKind,
        action: HealingAction,
        success: bool,
    ) -> ImmuneResult<()>;
    async fn failed_healing_actions(&self, agent_id: &str, diagnosis: DiagnosisKind) -> ImmuneResult<Vec<HealingAction>>;
    async fn total_healings(&self) -> ImmuneResult<u64>;
    async fn healing_success_rate(&self) -> ImmuneResult<f64>;
    async fn pattern_summary(&self) -> ImmuneResult<Value>;

    async fn write_action_log(&self, action_type: &str, agent_id: &str, payload: Value) -> ImmuneResult<()>;
    async fn recent_actions(&self, limit: usize) -> ImmuneResult<Vec<ActionLogEntry>>;
}

fn within_window(timestamp: DateTime<Utc>, window_secs: i64) -> bool {
    (Utc::now() - timestamp).num_seconds() <= window_secs
}

/// SQLite-backed store, one file per deployment. Tables are namespaced by `run_id`
/// so several orchestrator instances can point at the same file in a shared-disk
/// deployment without reading each other's history.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    run_id: String,
}

impl SqliteStore {
    pub fn open(path: &str, run_id: impl Into<String>) -> ImmuneResult<Self> {
        let conn = Connection::open(path).map_err(|e| ImmuneError::StoreError {
            operation: "open".to_string(),
            reason: e.to_string(),
        })?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS vitals (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL, payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS baselines (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, payload TEXT NOT NULL,
                PRIMARY KEY (run_id, agent_id)
            );
            CREATE TABLE IF NOT EXISTS infection_events (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL,
                max_deviation REAL NOT NULL, anomalies TEXT NOT NULL, diagnosis_type TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS quarantine_events (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL,
                action TEXT NOT NULL, duration_s REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS approval_events (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL, payload TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS healing_events (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL,
                diagnosis TEXT NOT NULL, action TEXT NOT NULL, success INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS action_log (
                run_id TEXT NOT NULL, agent_id TEXT NOT NULL, ts TEXT NOT NULL,
                action_type TEXT NOT NULL, payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_vitals_agent ON vitals(run_id, agent_id);
            CREATE INDEX IF NOT EXISTS idx_approval_agent ON approval_events(run_id, agent_id);
            ",
        )
        .map_err(|e| ImmuneError::StoreError {
            operation: "migrate".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            run_id: run_id.into(),
        })
    }

    fn store_err(operation: &str, e: impl std::fmt::Display) -> ImmuneError {
        ImmuneError::StoreError {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn write_vitals(&self, vitals: &AgentVitals) -> ImmuneResult<()> {
        let payload = serde_json::to_string(vitals).map_err(|e| Self::store_err("write_vitals", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO vitals (run_id, agent_id, ts, payload) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![self.run_id, vitals.agent_id, vitals.timestamp.to_rfc3339(), payload],
        )
        .map_err(|e| Self::store_err("write_vitals", e))?;
        Ok(())
    }

    async fn recent_vitals(&self, agent_id: &str, window_secs: i64) -> ImmuneResult<Vec<AgentVitals>> {
        let all = self.all_vitals(agent_id).await?;
        Ok(all.into_iter().filter(|v| within_window(v.timestamp, window_secs)).collect())
    }

    async fn all_vitals(&self, agent_id: &str) -> ImmuneResult<Vec<AgentVitals>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT payload FROM vitals WHERE run_id = ?1 AND agent_id = ?2 ORDER BY ts ASC")
            .map_err(|e| Self::store_err("all_vitals", e))?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id, agent_id], |row| row.get::<_, String>(0))
            .map_err(|e| Self::store_err("all_vitals", e))?;
        let mut out = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| Self::store_err("all_vitals", e))?;
            out.push(serde_json::from_str(&payload).map_err(|e| Self::store_err("all_vitals", e))?);
        }
        Ok(out)
    }

    async fn latest_vitals(&self, agent_id: &str) -> ImmuneResult<Option<AgentVitals>> {
        Ok(self.all_vitals(agent_id).await?.into_iter().last())
    }

    async fn execution_count(&self, agent_id: &str) -> ImmuneResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM vitals WHERE run_id = ?1 AND agent_id = ?2",
                rusqlite::params![self.run_id, agent_id],
                |row| row.get(0),
            )
            .map_err(|e| Self::store_err("execution_count", e))?;
        Ok(count as u64)
    }

    async fn total_executions(&self) -> ImmuneResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM vitals WHERE run_id = ?1", rusqlite::params![self.run_id], |row| row.get(0))
            .map_err(|e| Self::store_err("total_executions", e))?;
        Ok(count as u64)
    }

    async fn write_baseline(&self, profile: &BaselineProfile) -> ImmuneResult<()> {
        let payload = serde_json::to_string(profile).map_err(|e| Self::store_err("write_baseline", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO baselines (run_id, agent_id, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(run_id, agent_id) DO UPDATE SET payload = excluded.payload",
            rusqlite::params![self.run_id, profile.agent_id, payload],
        )
        .map_err(|e| Self::store_err("write_baseline", e))?;
        Ok(())
    }

    async fn get_baseline(&self, agent_id: &str) -> ImmuneResult<Option<BaselineProfile>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM baselines WHERE run_id = ?1 AND agent_id = ?2",
                rusqlite::params![self.run_id, agent_id],
                |row| row.get(0),
            )
            .ok();
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p).map_err(|e| Self::store_err("get_baseline", e))?)),
            None => Ok(None),
        }
    }

    async fn count_baselines(&self) -> ImmuneResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM baselines WHERE run_id = ?1", rusqlite::params![self.run_id], |row| row.get(0))
            .map_err(|e| Self::store_err("count_baselines", e))?;
        Ok(count as u64)
    }

    async fn write_infection_event(
        &self,
        agent_id: &str,
        max_deviation: f64,
        anomalies: &[String],
        diagnosis_type: &str,
    ) -> ImmuneResult<()> {
        let anomalies_json = serde_json::to_string(anomalies).map_err(|e| Self::store_err("write_infection_event", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO infection_events (run_id, agent_id, ts, max_deviation, anomalies, diagnosis_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![self.run_id, agent_id, Utc::now().to_rfc3339(), max_deviation, anomalies_json, diagnosis_type],
        )
        .map_err(|e| Self::store_err("write_infection_event", e))?;
        Ok(())
    }

    async fn write_quarantine_event(&self, agent_id: &str, action: &str, duration_s: f64) -> ImmuneResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO quarantine_events (run_id, agent_id, ts, action, duration_s) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![self.run_id, agent_id, Utc::now().to_rfc3339(), action, duration_s],
        )
        .map_err(|e| Self::store_err("write_quarantine_event", e))?;
        Ok(())
    }

    async fn write_approval_event(&self, state: &ApprovalState) -> ImmuneResult<()> {
        let payload = serde_json::to_string(state).map_err(|e| Self::store_err("write_approval_event", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO approval_events (run_id, agent_id, ts, payload) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![self.run_id, state.agent_id, state.timestamp.to_rfc3339(), payload],
        )
        .map_err(|e| Self::store_err("write_approval_event", e))?;
        Ok(())
    }

    async fn latest_approval_state(&self, agent_id: &str) -> ImmuneResult<Option<ApprovalState>> {
        let conn = self.conn.lock().await;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM approval_events WHERE run_id = ?1 AND agent_id = ?2 ORDER BY ts DESC LIMIT 1",
                rusqlite::params![self.run_id, agent_id],
                |row| row.get(0),
            )
            .ok();
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p).map_err(|e| Self::store_err("latest_approval_state", e))?)),
            None => Ok(None),
        }
    }

    async fn pending_approvals(&self) -> ImmuneResult<Vec<ApprovalState>> {
        let agents = self.distinct_approval_agents().await?;
        let mut out = Vec::new();
        for agent_id in agents {
            if let Some(state) = self.latest_approval_state(&agent_id).await? {
                if state.decision == "pending" {
                    out.push(state);
                }
            }
        }
        Ok(out)
    }

    async fn rejected_approvals(&self) -> ImmuneResult<Vec<ApprovalState>> {
        let agents = self.distinct_approval_agents().await?;
        let mut out = Vec::new();
        for agent_id in agents {
            if let Some(state) = self.latest_approval_state(&agent_id).await? {
                if state.decision == "rejected" {
                    out.push(state);
                }
            }
        }
        Ok(out)
    }

    async fn write_healing_event(
        &self,
        agent_id: &str,
        diagnosis: DiagnosisKind,
        action: HealingAction,
        success: bool,
    ) -> ImmuneResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO healing_events (run_id, agent_id, ts, diagnosis, action, success) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                self.run_id,
                agent_id,
                Utc::now().to_rfc3339(),
                format!("{diagnosis:?}"),
                format!("{action:?}"),
                success as i64
            ],
        )
        .map_err(|e| Self::store_err("write_healing_event", e))?;
        Ok(())
    }

    async fn failed_healing_actions(&self, agent_id: &str, diagnosis: DiagnosisKind) -> ImmuneResult<Vec<HealingAction>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT action FROM healing_events WHERE run_id = ?1 AND agent_id = ?2 AND diagnosis = ?3 AND success = 0")
            .map_err(|e| Self::store_err("failed_healing_actions", e))?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id, agent_id, format!("{diagnosis:?}")], |row| row.get::<_, String>(0))
            .map_err(|e| Self::store_err("failed_healing_actions", e))?;
        let mut out = Vec::new();
        for row in rows {
            let action = row.map_err(|e| Self::store_err("failed_healing_actions", e))?;
            if let Some(parsed) = parse_healing_action(&action) {
                out.push(parsed);
            }
        }
        Ok(out)
    }

    async fn total_healings(&self) -> ImmuneResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM healing_events WHERE run_id = ?1", rusqlite::params![self.run_id], |row| row.get(0))
            .map_err(|e| Self::store_err("total_healings", e))?;
        Ok(count as u64)
    }

    async fn healing_success_rate(&self) -> ImmuneResult<f64> {
        let conn = self.conn.lock().await;
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM healing_events WHERE run_id = ?1", rusqlite::params![self.run_id], |row| row.get(0))
            .map_err(|e| Self::store_err("healing_success_rate", e))?;
        if total == 0 {
            return Ok(0.0);
        }
        let successes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM healing_events WHERE run_id = ?1 AND success = 1",
                rusqlite::params![self.run_id],
                |row| row.get(0),
            )
            .map_err(|e| Self::store_err("healing_success_rate", e))?;
        Ok(successes as f64 / total as f64)
    }

    async fn pattern_summary(&self) -> ImmuneResult<Value> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT diagnosis, action, COUNT(*) FROM healing_events
                 WHERE run_id = ?1 AND success = 1 GROUP BY diagnosis, action",
            )
            .map_err(|e| Self::store_err("pattern_summary", e))?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
            })
            .map_err(|e| Self::store_err("pattern_summary", e))?;
        let mut best: HashMap<String, (String, i64)> = HashMap::new();
        for row in rows {
            let (diagnosis, action, count) = row.map_err(|e| Self::store_err("pattern_summary", e))?;
            let entry = best.entry(diagnosis).or_insert((action.clone(), 0));
            if count > entry.1 {
                *entry = (action, count);
            }
        }
        let mut out = serde_json::Map::new();
        for (diagnosis, (action, count)) in best {
            out.insert(diagnosis, serde_json::json!({ "best_action": action, "success_count": count }));
        }
        Ok(Value::Object(out))
    }

    async fn write_action_log(&self, action_type: &str, agent_id: &str, payload: Value) -> ImmuneResult<()> {
        let payload_str = serde_json::to_string(&payload).map_err(|e| Self::store_err("write_action_log", e))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO action_log (run_id, agent_id, ts, action_type, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![self.run_id, agent_id, Utc::now().to_rfc3339(), action_type, payload_str],
        )
        .map_err(|e| Self::store_err("write_action_log", e))?;
        Ok(())
    }

    async fn recent_actions(&self, limit: usize) -> ImmuneResult<Vec<ActionLogEntry>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT action_type, agent_id, ts, payload FROM action_log WHERE run_id = ?1 ORDER BY ts DESC LIMIT ?2")
            .map_err(|e| Self::store_err("recent_actions", e))?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, String>(3)?))
            })
            .map_err(|e| Self::store_err("recent_actions", e))?;
        let mut out = Vec::new();
        for row in rows {
            let (action_type, agent_id, ts, payload) = row.map_err(|e| Self::store_err("recent_actions", e))?;
            out.push(ActionLogEntry {
                action_type,
                agent_id,
                timestamp: DateTime::parse_from_rfc3339(&ts).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            });
        }
        out.reverse();
        Ok(out)
    }
}

impl SqliteStore {
    async fn distinct_approval_agents(&self) -> ImmuneResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT agent_id FROM approval_events WHERE run_id = ?1")
            .map_err(|e| Self::store_err("distinct_approval_agents", e))?;
        let rows = stmt
            .query_map(rusqlite::params![self.run_id], |row| row.get::<_, String>(0))
            .map_err(|e| Self::store_err("distinct_approval_agents", e))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| Self::store_err("distinct_approval_agents", e))?);
        }
        Ok(out)
    }
}

fn parse_healing_action(s: &str) -> Option<HealingAction> {
    match s {
        "ResetMemory" => Some(HealingAction::ResetMemory),
        "RollbackPrompt" => Some(HealingAction::RollbackPrompt),
        "ReduceAutonomy" => Some(HealingAction::ReduceAutonomy),
        "RevokeTools" => Some(HealingAction::RevokeTools),
        "ResetAgent" => Some(HealingAction::ResetAgent),
        _ => None,
    }
}

/// In-memory store for tests and single-process demos; same semantics as
/// [`SqliteStore`] minus durability across restarts.
#[derive(Default)]
pub struct MemoryStore {
    vitals: DashMap<String, Vec<AgentVitals>>,
    baselines: DashMap<String, BaselineProfile>,
    approvals: DashMap<String, Vec<ApprovalState>>,
    healings: DashMap<(String, String, String), (u64, u64)>,
    history: Mutex<Vec<(String, DiagnosisKind, HealingAction, bool)>>,
    action_log: Mutex<Vec<ActionLogEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn write_vitals(&self, vitals: &AgentVitals) -> ImmuneResult<()> {
        self.vitals.entry(vitals.agent_id.clone()).or_default().push(vitals.clone());
        Ok(())
    }

    async fn recent_vitals(&self, agent_id: &str, window_secs: i64) -> ImmuneResult<Vec<AgentVitals>> {
        Ok(self
            .vitals
            .get(agent_id)
            .map(|v| v.iter().filter(|p| within_window(p.timestamp, window_secs)).cloned().collect())
            .unwrap_or_default())
    }

    async fn all_vitals(&self, agent_id: &str) -> ImmuneResult<Vec<AgentVitals>> {
        Ok(self.vitals.get(agent_id).map(|v| v.clone()).unwrap_or_default())
    }

    async fn latest_vitals(&self, agent_id: &str) -> ImmuneResult<Option<AgentVitals>> {
        Ok(self.vitals.get(agent_id).and_then(|v| v.last().cloned()))
    }

    async fn execution_count(&self, agent_id: &str) -> ImmuneResult<u64> {
        Ok(self.vitals.get(agent_id).map(|v| v.len() as u64).unwrap_or(0))
    }

    async fn total_executions(&self) -> ImmuneResult<u64> {
        Ok(self.vitals.iter().map(|e| e.value().len() as u64).sum())
    }

    async fn write_baseline(&self, profile: &BaselineProfile) -> ImmuneResult<()> {
        self.baselines.insert(profile.agent_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_baseline(&self, agent_id: &str) -> ImmuneResult<Option<BaselineProfile>> {
        Ok(self.baselines.get(agent_id).map(|b| b.clone()))
    }

    async fn count_baselines(&self) -> ImmuneResult<u64> {
        Ok(self.baselines.len() as u64)
    }

    async fn write_infection_event(
        &self,
        _agent_id: &str,
        _max_deviation: f64,
        _anomalies: &[String],
        _diagnosis_type: &str,
    ) -> ImmuneResult<()> {
        Ok(())
    }

    async fn write_quarantine_event(&self, _agent_id: &str, _action: &str, _duration_s: f64) -> ImmuneResult<()> {
        Ok(())
    }

    async fn write_approval_event(&self, state: &ApprovalState) -> ImmuneResult<()> {
        self.approvals.entry(state.agent_id.clone()).or_default().push(state.clone());
        Ok(())
    }

    async fn latest_approval_state(&self, agent_id: &str) -> ImmuneResult<Option<ApprovalState>> {
        Ok(self.approvals.get(agent_id).and_then(|v| v.last().cloned()))
    }

    async fn pending_approvals(&self) -> ImmuneResult<Vec<ApprovalState>> {
        Ok(self
            .approvals
            .iter()
            .filter_map(|e| e.value().last().cloned())
            .filter(|s| s.decision == "pending")
            .collect())
    }

    async fn rejected_approvals(&self) -> ImmuneResult<Vec<ApprovalState>> {
        Ok(self
            .approvals
            .iter()
            .filter_map(|e| e.value().last().cloned())
            .filter(|s| s.decision == "rejected")
            .collect())
    }

    async fn write_healing_event(
        &self,
        agent_id: &str,
        diagnosis: DiagnosisKind,
        action: HealingAction,
        success: bool,
    ) -> ImmuneResult<()> {
        let key = (agent_id.to_string(), format!("{diagnosis:?}"), format!("{action:?}"));
        let mut entry = self.healings.entry(key).or_insert((0, 0));
        if success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
        self.history.lock().await.push((agent_id.to_string(), diagnosis, action, success));
        Ok(())
    }

    async fn failed_healing_actions(&self, agent_id: &str, diagnosis: DiagnosisKind) -> ImmuneResult<Vec<HealingAction>> {
        let history = self.history.lock().await;
        let mut out = Vec::new();
        for (aid, d, action, success) in history.iter() {
            if aid == agent_id && *d == diagnosis && !success && !out.contains(action) {
                out.push(*action);
            }
        }
        Ok(out)
    }

    async fn total_healings(&self) -> ImmuneResult<u64> {
        Ok(self.history.lock().await.len() as u64)
    }

    async fn healing_success_rate(&self) -> ImmuneResult<f64> {
        let history = self.history.lock().await;
        if history.is_empty() {
            return Ok(0.0);
        }
        let successes = history.iter().filter(|(_, _, _, s)| *s).count();
        Ok(successes as f64 / history.len() as f64)
    }

    async fn pattern_summary(&self) -> ImmuneResult<Value> {
        let mut best: HashMap<String, (String, u64)> = HashMap::new();
        for entry in &self.healings {
            let (agent_diag_action, (success_count, _)) = (entry.key().clone(), *entry.value());
            if success_count == 0 {
                continue;
            }
            let (_, diagnosis, action) = agent_diag_action;
            let slot = best.entry(diagnosis).or_insert((action.clone(), 0));
            if success_count > slot.1 {
                *slot = (action, success_count);
            }
        }
        let mut out = serde_json::Map::new();
        for (diagnosis, (action, count)) in best {
            out.insert(diagnosis, serde_json::json!({ "best_action": action, "success_count": count }));
        }
        Ok(Value::Object(out))
    }

    async fn write_action_log(&self, action_type: &str, agent_id: &str, payload: Value) -> ImmuneResult<()> {
        self.action_log.lock().await.push(ActionLogEntry {
            action_type: action_type.to_string(),
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
            payload,
        });
        Ok(())
    }

    async fn recent_actions(&self, limit: usize) -> ImmuneResult<Vec<ActionLogEntry>> {
        let log = self.action_log.lock().await;
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn vitals(agent: &str) -> AgentVitals {
        AgentVitals {
            agent_id: agent.to_string(),
            timestamp: Utc::now(),
            agent_type: "worker".to_string(),
            latency_ms: 100.0,
            total_tokens: 50.0,
            input_tokens: 30.0,
            output_tokens: 20.0,
            tool_calls: 1.0,
            retries: 0.0,
            success: true,
            cost: 0.01,
            model: "gpt-4".to_string(),
            error_category: None,
            prompt_hash: Some("h".to_string()),
        }
    }

    #[tokio::test]
    async fn memory_store_round_trips_vitals() {
        let store = MemoryStore::new();
        store.write_vitals(&vitals("a1")).await.unwrap();
        let recent = store.recent_vitals("a1", 60).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(store.total_executions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn memory_store_tracks_pending_and_rejected_separately() {
        let store = MemoryStore::new();
        let base = ApprovalState {
            agent_id: "a1".to_string(),
            decision: "pending".to_string(),
            max_deviation: 5.0,
            anomalies: vec!["latency_spike".to_string()],
            diagnosis_type: "ToolInstability".to_string(),
            reasoning: "latency spiked".to_string(),
            infection_payload: serde_json::json!({}),
            timestamp: Utc::now(),
        };
        store.write_approval_event(&base).await.unwrap();
        assert_eq!(store.pending_approvals().await.unwrap().len(), 1);
        let mut rejected = base.clone();
        rejected.decision = "rejected".to_string();
        store.write_approval_event(&rejected).await.unwrap();
        assert_eq!(store.pending_approvals().await.unwrap().len(), 0);
        assert_eq!(store.rejected_approvals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sqlite_store_persists_baseline_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("immune-test.db");
        let store = SqliteStore::open(path.to_str().unwrap(), "test-run").expect("open");
        let profile = BaselineProfile {
            agent_id: "a1".to_string(),
            metrics: Vec::new(),
            sample_count: 42,
            dominant_prompt_hash: Some("h".to_string()),
            ready: true,
        };
        store.write_baseline(&profile).await.unwrap();
        let fetched = store.get_baseline("a1").await.unwrap().expect("should exist");
        assert_eq!(fetched.sample_count, 42);
    }
}
