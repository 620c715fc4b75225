use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use super::planner::Plan;
use crate::queue::TaskResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Processing,
    InProgress,
    Completed,
    Failed,
}

/// Process-lifetime progress of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub id: String,
    pub description: String,
    pub status: RunStatus,
    pub branch_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// In-memory run status map owned by an `Orchestrator`.
///
/// Cheap to clone; every clone shares the same map. Each update is also
/// broadcast to subscribers. Nothing here is persisted.
#[derive(Clone)]
pub struct StatusRegistry {
    runs: Arc<RwLock<HashMap<String, RunState>>>,
    tx: broadcast::Sender<RunState>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunState> {
        self.tx.subscribe()
    }

    /// Record a new run in `processing`, replacing any earlier run with the same id.
    pub async fn start(&self, id: &str, description: &str, branch_name: &str) {
        let now = Utc::now();
        let state = RunState {
            id: id.to_string(),
            description: description.to_string(),
            status: RunStatus::Processing,
            branch_name: branch_name.to_string(),
            plan: None,
            result: None,
            error: None,
            started_at: now,
            updated_at: now,
        };
        self.runs.write().await.insert(id.to_string(), state.clone());
        let _ = self.tx.send(state);
    }

    async fn update(&self, id: &str, f: impl FnOnce(&mut RunState)) {
        let mut runs = self.runs.write().await;
        let Some(state) = runs.get_mut(id) else {
            tracing::debug!(run_id = id, "Status update for unknown run ignored");
            return;
        };
        f(state);
        state.updated_at = Utc::now();
        let _ = self.tx.send(state.clone());
    }

    /// Attach or refresh the plan and mark the run `in-progress`.
    pub async fn set_plan(&self, id: &str, plan: &Plan) {
        self.update(id, |state| {
            state.status = RunStatus::InProgress;
            state.plan = Some(plan.clone());
        })
        .await;
    }

    pub async fn complete(&self, id: &str, result: &TaskResult) {
        self.update(id, |state| {
            state.status = RunStatus::Completed;
            state.result = Some(result.clone());
            state.error = None;
        })
        .await;
    }

    pub async fn fail(&self, id: &str, error: &str) {
        self.update(id, |state| {
            state.status = RunStatus::Failed;
            state.error = Some(error.to_string());
        })
        .await;
    }

    pub async fn get(&self, id: &str) -> Option<RunState> {
        self.runs.read().await.get(id).cloned()
    }

    /// All runs, oldest first.
    pub async fn list(&self) -> Vec<RunState> {
        let mut runs: Vec<RunState> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        runs
    }
}
