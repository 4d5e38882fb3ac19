//! # Task Registry
//!
//! In-memory state of every batch task submitted since the process started.
//! The registry is the only way to read or change task state: callers get
//! snapshots from [`TaskRegistry::get`] and request changes through
//! [`TaskRegistry::transition`], which enforces the status order.
//!
//! ## State Transitions:
//! ```text
//! Pending ──► Processing ──► Completed
//!    │             │
//!    └─────────────┴───────► Failed
//! ```
//! `Pending → Failed` covers jobs that die before a worker picks them up
//! (pool shut down, worker panic). Nothing ever moves backwards.
//!
//! Tasks are never evicted; state is lost on restart.

use crate::error::{AppError, AppResult};
use crate::transcription::result::FileResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque batch task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

/// Lifecycle position of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

/// A requested status change together with the data it carries.
///
/// Results only travel with `Complete` and errors only with `Fail`, so a
/// completed task can't pick up errors and vice versa.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskTransition {
    Start,
    Complete(Vec<FileResult>),
    Fail(String),
}

impl TaskTransition {
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskTransition::Start => TaskStatus::Processing,
            TaskTransition::Complete(_) => TaskStatus::Completed,
            TaskTransition::Fail(_) => TaskStatus::Failed,
        }
    }
}

/// Snapshot of one task, also the body of the poll endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub results: Vec<FileResult>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Task {
    fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Pending,
            results: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }
}

/// Concurrent map of task id to task state.
///
/// ## Thread Safety:
/// Backed by a sharded `DashMap`. `transition` holds the shard lock for the
/// task's key while it checks and applies the change, so two writers on the
/// same task are serialized and writers on different tasks rarely contend.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new `pending` task and return its id.
    pub fn create(&self) -> TaskId {
        let task_id = TaskId::new();
        self.tasks.insert(task_id, Task::new(task_id));
        tracing::debug!(task_id = %task_id, "Task created");
        task_id
    }

    /// Apply `transition` to the task atomically.
    ///
    /// ## Errors:
    /// - `NotFound` if the id is unknown
    /// - `InvalidTransition` if the change would skip or reverse the order
    pub fn transition(&self, task_id: &TaskId, transition: TaskTransition) -> AppResult<()> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

        let target = transition.target();
        if !task.status.can_transition_to(target) {
            return Err(AppError::InvalidTransition(format!(
                "task {} cannot move from {} to {}",
                task_id,
                task.status.as_str(),
                target.as_str()
            )));
        }

        match transition {
            TaskTransition::Start => {}
            TaskTransition::Complete(results) => task.results = results,
            TaskTransition::Fail(error) => task.errors.push(error),
        }
        task.status = target;
        task.last_updated = Utc::now();

        if target.is_terminal() {
            tracing::info!(task_id = %task_id, status = target.as_str(), "Task finished");
        } else {
            tracing::debug!(task_id = %task_id, status = target.as_str(), "Task transitioned");
        }
        Ok(())
    }

    /// Copy of the task's current state.
    pub fn get(&self, task_id: &TaskId) -> AppResult<Task> {
        self.tasks
            .get(task_id)
            .map(|task| task.clone())
            .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Number of tasks in each status, for the health endpoint.
    pub fn status_counts(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.iter() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }
}
