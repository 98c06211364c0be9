//! Task records and the task state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::{AgentId, CapabilitySet};
use crate::error::TaskError;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new task ID using UUID v7 (time-ordered)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Task lifecycle status
///
/// ```text
/// Pending --start--> Running --pause--> Paused --resume--> Running
/// Running --progress(complete)--> Completed
/// Running|Paused --fail--> Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Running or Paused: the task holds an agent
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named step of a task's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub(crate) name: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Progress record reported while a task runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current: u32,
    pub total: u32,
    #[serde(default)]
    pub steps: Vec<ProgressStep>,
}

impl TaskProgress {
    pub fn is_complete(&self) -> bool {
        self.current == self.total
    }

    /// Take counters from `update` and merge its steps by name
    ///
    /// Steps already present are replaced in place; new steps are appended
    /// in the order they appear in the update.
    pub fn merge(&mut self, update: TaskProgress) {
        self.current = update.current;
        self.total = update.total;
        for step in update.steps {
            match self.steps.iter_mut().find(|s| s.name == step.name) {
                Some(existing) => *existing = step,
                None => self.steps.push(step),
            }
        }
    }

    /// Outputs of every step that produced one, in step order
    pub fn outputs(&self) -> Vec<Value> {
        self.steps.iter().filter_map(|s| s.output.clone()).collect()
    }
}

/// Request to create a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub(crate) description: String,
    #[serde(default)]
    pub(crate) parent_task_id: Option<TaskId>,
    /// Known capability requirement; when absent the analyzer decides
    #[serde(default)]
    pub capabilities: Option<CapabilitySet>,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_parent(mut self, parent: TaskId) -> Self {
        self.parent_task_id = Some(parent);
        self
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Some(capabilities);
        self
    }
}

/// A unit of work
///
/// The task manager is the only writer of these records; it moves them
/// through the transition methods below so that `agent_id` is set exactly
/// while the task is `Running` or `Paused`, and `result` / `error` only
/// appear on `Completed` / `Failed` respectively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub(crate) id: TaskId,
    pub name: String,
    pub description: String,
    pub(crate) status: TaskStatus,
    pub(crate) capabilities: CapabilitySet,
    pub(crate) agent_id: Option<AgentId>,
    pub parent_task_id: Option<TaskId>,
    pub(crate) progress: TaskProgress,
    pub(crate) metadata: Value,
    pub(crate) result: Option<Value>,
    pub(crate) error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) started_at: Option<DateTime<Utc>>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// A new `Pending` task
    pub fn new(spec: TaskSpec, capabilities: CapabilitySet, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            name: spec.name,
            description: spec.description,
            status: TaskStatus::Pending,
            capabilities,
            agent_id: None,
            parent_task_id: spec.parent_task_id,
            progress: TaskProgress::default(),
            metadata,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// Capabilities an agent must have to run this task
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Bound agent, present exactly while `Running` or `Paused`
    pub fn agent_id(&self) -> Option<&AgentId> {
        self.agent_id.as_ref()
    }

    pub fn parent_task_id(&self) -> Option<TaskId> {
        self.parent_task_id
    }

    pub fn progress(&self) -> &TaskProgress {
        &self.progress
    }

    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// Step outputs, once `Completed`
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Failure cause, once `Failed`
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub(crate) fn start(&mut self, agent_id: AgentId, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.expect(TaskStatus::Pending, "start")?;
        self.status = TaskStatus::Running;
        self.agent_id = Some(agent_id);
        self.started_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn pause(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.expect(TaskStatus::Running, "pause")?;
        self.status = TaskStatus::Paused;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn resume(&mut self, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.expect(TaskStatus::Paused, "resume")?;
        self.status = TaskStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn complete(&mut self, result: Value, now: DateTime<Utc>) -> Result<(), TaskError> {
        self.expect(TaskStatus::Running, "complete")?;
        self.status = TaskStatus::Completed;
        self.agent_id = None;
        self.result = Some(result);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), TaskError> {
        if !self.status.is_active() {
            return Err(self.invalid_transition("fail"));
        }
        self.status = TaskStatus::Failed;
        self.agent_id = None;
        self.error = Some(reason);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub(crate) fn expect(&self, expected: TaskStatus, action: &'static str) -> Result<(), TaskError> {
        if self.status != expected {
            return Err(self.invalid_transition(action));
        }
        Ok(())
    }

    fn invalid_transition(&self, action: &'static str) -> TaskError {
        TaskError::InvalidTransition {
            task_id: self.id,
            from: self.status,
            action,
        }
    }
}
