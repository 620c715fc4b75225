use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::{FileRecord, ReviewRequestRef};

/// Lifecycle stage of a queued task. Each variant names one queue partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

fn default_create_pr() -> bool {
    true
}

fn default_base_branch() -> String {
    "main".to_string()
}

/// Caller-supplied task settings.
///
/// Unknown fields are kept in `extra` so newer clients can round-trip
/// settings this version does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptions {
    #[serde(rename = "createPR", default = "default_create_pr")]
    pub create_pr: bool,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub existing_files: BTreeMap<String, String>,
    /// `Some(false)` disables planning and forces the single-step path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_planning: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            create_pr: default_create_pr(),
            base_branch: default_base_branch(),
            branch_name: None,
            requirements: None,
            existing_files: BTreeMap::new(),
            use_planning: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl TaskOptions {
    /// Normalize blank values to their defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.base_branch.trim().is_empty() {
            self.base_branch = default_base_branch();
        }
        if self.branch_name.as_deref().is_some_and(|b| b.trim().is_empty()) {
            self.branch_name = None;
        }
        if self.requirements.as_deref().is_some_and(|r| r.trim().is_empty()) {
            self.requirements = None;
        }
        self
    }

    pub fn planning_enabled(&self) -> bool {
        self.use_planning != Some(false)
    }

    /// Branch to work on: the explicit name, or `feature/<run_id>`.
    pub fn branch_for(&self, run_id: &str) -> String {
        self.branch_name
            .clone()
            .unwrap_or_else(|| format!("feature/{}", run_id))
    }
}

/// Outcome attached to a completed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub branch_name: String,
    pub files: Vec<FileRecord>,
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<ReviewRequestRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub options: TaskOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(description: &str, options: TaskOptions) -> Self {
        Self {
            id: new_task_id(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            failed_at: None,
            options: options.with_defaults(),
            result: None,
            error: None,
        }
    }
}

/// The persisted queue document: one array per lifecycle stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default)]
    pub pending: Vec<Task>,
    #[serde(default)]
    pub processing: Vec<Task>,
    #[serde(default)]
    pub completed: Vec<Task>,
    #[serde(default)]
    pub failed: Vec<Task>,
}

impl QueueSnapshot {
    pub fn partition(&self, status: TaskStatus) -> &Vec<Task> {
        match status {
            TaskStatus::Pending => &self.pending,
            TaskStatus::Processing => &self.processing,
            TaskStatus::Completed => &self.completed,
            TaskStatus::Failed => &self.failed,
        }
    }

    pub fn partition_mut(&mut self, status: TaskStatus) -> &mut Vec<Task> {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Processing => &mut self.processing,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
        }
    }

    /// Remove the task with `id` from the given partition, if present.
    pub fn take(&mut self, status: TaskStatus, id: &str) -> Option<Task> {
        let partition = self.partition_mut(status);
        let index = partition.iter().position(|t| t.id == id)?;
        Some(partition.remove(index))
    }

    /// First match across partitions, in lifecycle order.
    pub fn find(&self, id: &str) -> Option<&Task> {
        TaskStatus::ALL
            .iter()
            .find_map(|status| self.partition(*status).iter().find(|t| t.id == id))
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending.len(),
            processing: self.processing.len(),
            completed: self.completed.len(),
            failed: self.failed.len(),
            total: self.pending.len()
                + self.processing.len()
                + self.completed.len()
                + self.failed.len(),
        }
    }
}

/// Per-partition counts, always derived from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

static LAST_ID_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Generate a `task-<millis>-<suffix>` id.
///
/// The millisecond component is strictly increasing within a process, so ids
/// sort by creation order.
pub fn new_task_id() -> String {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_ID_MILLIS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now - 1);
    let millis = now.max(previous + 1);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("task-{}-{}", millis, &suffix[..9])
}
