//! Error types for conductor-core
//!
//! Each component owns an error enum. Every error maps onto a stable
//! taxonomy code via `code()`, which is what callers see in error replies.

use std::time::Duration;

use thiserror::Error;

use crate::agent::{AgentId, AgentStatus};
use crate::task::{TaskId, TaskStatus};

/// Top-level error type for conductor-core
#[derive(Error, Debug)]
pub enum ConductorError {
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl ConductorError {
    /// Taxonomy code of the underlying error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Agent(e) => e.code(),
            Self::Task(e) => e.code(),
            Self::Supervisor(e) => e.code(),
            Self::Dispatch(e) => e.code(),
        }
    }
}

/// Errors from the agent registry
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    NotFound(AgentId),

    #[error("Agent already registered: {0}")]
    AlreadyRegistered(AgentId),

    #[error("Invalid state for agent {agent_id}: expected {expected}, got {actual}")]
    InvalidState {
        agent_id: AgentId,
        expected: String,
        actual: AgentStatus,
    },

    #[error("Agent {agent_id} is not bound to task {task_id}")]
    NotBound { agent_id: AgentId, task_id: TaskId },
}

impl AgentError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyRegistered(_) => "AlreadyRegistered",
            Self::InvalidState { .. } | Self::NotBound { .. } => "InvalidState",
        }
    }
}

/// Errors from the task lifecycle manager
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Parent task not found: {0}")]
    ParentNotFound(TaskId),

    #[error("Cannot {action} task {task_id} while it is {from}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        action: &'static str,
    },

    #[error("No agent available for task {task_id} (requires {})", .capabilities.join(", "))]
    NoAgentAvailable {
        task_id: TaskId,
        capabilities: Vec<String>,
    },

    #[error("Invalid progress: current {current} exceeds total {total}")]
    InvalidProgress { current: u32, total: u32 },

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) | Self::ParentNotFound(_) => "NotFound",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::NoAgentAvailable { .. } => "NoAgentAvailable",
            Self::InvalidProgress { .. } => "InvalidProgress",
            Self::Analyzer(_) => "AnalyzerFailure",
            Self::Agent(e) => e.code(),
            Self::Repository(_) => "RepositoryFailure",
        }
    }

    /// Whether the caller should retry later rather than give up
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NoAgentAvailable { .. })
    }
}

/// Failure reported by a task analyzer
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Task analysis failed: {0}")]
pub struct AnalyzerError(pub String);

/// Failure reported by the browser automation collaborator
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Browser automation failed: {0}")]
pub struct AutomationError(pub String);

/// Errors from a task repository
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Task {0} already exists")]
    Duplicate(TaskId),

    #[error("Task {0} does not exist")]
    Missing(TaskId),

    #[error("Repository failure: {0}")]
    Backend(String),
}

/// Errors from tool-server method handlers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors from the process supervisor
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("No configuration found for server: {0}")]
    UnknownServer(String),

    #[error("Failed to spawn server {name}: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server {name} did not become ready within {timeout:?}")]
    StartupTimeout { name: String, timeout: Duration },

    #[error("Server {name} exited before becoming ready ({})", exit_label(.code))]
    ProcessExited { name: String, code: Option<i32> },

    #[error("Failed to stop server {name}: {reason}")]
    StopFailed { name: String, reason: String },

    #[error("Failed to stop {} server(s): {}", .failures.len(), describe_failures(.failures))]
    StopAll { failures: Vec<(String, String)> },
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "UnknownServer",
            Self::SpawnFailed { .. } => "SpawnFailed",
            Self::StartupTimeout { .. } => "StartupTimeout",
            Self::ProcessExited { .. } => "ProcessExited",
            Self::StopFailed { .. } | Self::StopAll { .. } => "StopFailed",
        }
    }
}

/// Errors surfaced by the dispatcher
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown message type")]
    UnknownMessageType(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Tool method {method} failed: {source}")]
    Tool {
        method: String,
        #[source]
        source: ToolError,
    },

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMessageType(_) => "UnknownMessageType",
            Self::UnknownMethod(_) => "UnknownMethod",
            Self::InvalidPayload(_) => "InvalidPayload",
            Self::Tool { .. } => "ToolFailure",
            Self::Automation(_) => "AutomationFailure",
            Self::Task(e) => e.code(),
        }
    }
}

/// Human-readable exit code, `signal` when the process had none
pub(crate) fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn describe_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, reason)| format!("{name}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}
