//! Event type definitions

use serde::{Deserialize, Serialize};

use crate::agent::{AgentId, AgentStatus};
use crate::supervisor::{OutputStream, ServerState};
use crate::task::{TaskId, TaskStatus};

/// Which entity collection an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Agent,
    Task,
    Server,
}

/// Events published on the conductor event bus
///
/// Events are emitted after the state change they describe is already
/// visible to queries, so consumers must not rely on receiving an event
/// before observing the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConductorEvent {
    /// A new agent joined the registry
    AgentRegistered {
        agent_id: AgentId,
        capabilities: Vec<String>,
    },

    /// An agent was removed from the registry
    AgentDeregistered { agent_id: AgentId },

    /// An agent changed status
    AgentStatusChanged {
        agent_id: AgentId,
        status: AgentStatus,
        task_id: Option<TaskId>,
    },

    /// A task was created in `Pending`
    TaskCreated {
        task_id: TaskId,
        name: String,
        parent_task_id: Option<TaskId>,
    },

    /// A task changed status
    TaskStatusChanged {
        task_id: TaskId,
        status: TaskStatus,
        agent_id: Option<AgentId>,
    },

    /// A managed server changed state
    ServerStateChanged { name: String, state: ServerState },

    /// One line of output from a managed server
    ServerOutput {
        name: String,
        stream: OutputStream,
        line: String,
    },

    /// A managed server exited on its own
    ServerExit { name: String, code: Option<i32> },

    /// A managed server was stopped on request
    ServerStopped { name: String },
}

impl ConductorEvent {
    /// The entity kind this event belongs to
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AgentRegistered { .. }
            | Self::AgentDeregistered { .. }
            | Self::AgentStatusChanged { .. } => EventKind::Agent,
            Self::TaskCreated { .. } | Self::TaskStatusChanged { .. } => EventKind::Task,
            Self::ServerStateChanged { .. }
            | Self::ServerOutput { .. }
            | Self::ServerExit { .. }
            | Self::ServerStopped { .. } => EventKind::Server,
        }
    }

    /// Server name for server events
    pub fn server_name(&self) -> Option<&str> {
        match self {
            Self::ServerStateChanged { name, .. }
            | Self::ServerOutput { name, .. }
            | Self::ServerExit { name, .. }
            | Self::ServerStopped { name } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_output_json_format() {
        let event = ConductorEvent::ServerOutput {
            name: "lint-server".to_string(),
            stream: OutputStream::Stderr,
            line: "warming up".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "server_output");
        assert_eq!(json["stream"], "stderr");
        assert_eq!(json["line"], "warming up");
    }

    #[test]
    fn server_exit_serialization_roundtrip() {
        let event = ConductorEvent::ServerExit {
            name: "lint-server".to_string(),
            code: Some(1),
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ConductorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn kind_groups_events_by_entity() {
        let agent = ConductorEvent::AgentDeregistered {
            agent_id: AgentId::new("A1"),
        };
        let task = ConductorEvent::TaskStatusChanged {
            task_id: TaskId::new(),
            status: TaskStatus::Running,
            agent_id: Some(AgentId::new("A1")),
        };
        let server = ConductorEvent::ServerStopped {
            name: "lint-server".to_string(),
        };

        assert_eq!(agent.kind(), EventKind::Agent);
        assert_eq!(task.kind(), EventKind::Task);
        assert_eq!(server.kind(), EventKind::Server);
    }

    #[test]
    fn server_name_only_for_server_events() {
        let server = ConductorEvent::ServerExit {
            name: "lint-server".to_string(),
            code: None,
        };
        let agent = ConductorEvent::AgentDeregistered {
            agent_id: AgentId::new("A1"),
        };

        assert_eq!(server.server_name(), Some("lint-server"));
        assert_eq!(agent.server_name(), None);
    }
}
