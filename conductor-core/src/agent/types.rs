//! Agent type definitions

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AgentError;
use crate::task::TaskId;

/// Maximum number of observations kept in an agent's short-term memory
pub const SHORT_TERM_CAPACITY: usize = 50;

/// Unordered, unique set of capability tags
pub type CapabilitySet = BTreeSet<String>;

/// Build a [`CapabilitySet`] from anything string-like
pub fn capability_set<I, S>(tags: I) -> CapabilitySet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

/// Opaque, caller-chosen agent identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Agent availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AgentStatus {
    /// Waiting for work
    #[default]
    Idle,
    /// Bound to a running task
    Busy,
    /// Bound to a paused task
    Paused,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Busy => "Busy",
            Self::Paused => "Paused",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent memory: a bounded observation log plus keyed working state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMemory {
    pub short_term: VecDeque<Value>,
    pub working_memory: BTreeMap<String, Value>,
}

impl AgentMemory {
    /// Append an observation, dropping the oldest beyond capacity
    pub fn observe(&mut self, observation: Value) {
        self.short_term.push_back(observation);
        while self.short_term.len() > SHORT_TERM_CAPACITY {
            self.short_term.pop_front();
        }
    }
}

/// A capability-tagged worker
///
/// `status` and `current_task_id` only change through the transition
/// methods below, which keep `current_task_id` set exactly while the
/// agent is `Busy` or `Paused`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    id: AgentId,
    capabilities: CapabilitySet,
    /// Managed server this agent needs in order to do its work
    server: Option<String>,
    status: AgentStatus,
    current_task_id: Option<TaskId>,
    memory: AgentMemory,
}

impl Agent {
    /// Create an idle agent
    pub fn new(id: impl Into<AgentId>, capabilities: CapabilitySet) -> Self {
        Self {
            id: id.into(),
            capabilities,
            server: None,
            status: AgentStatus::Idle,
            current_task_id: None,
            memory: AgentMemory::default(),
        }
    }

    /// Declare the managed server this agent depends on
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn current_task_id(&self) -> Option<TaskId> {
        self.current_task_id
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Idle and holding every required capability
    pub fn can_serve(&self, required: &CapabilitySet) -> bool {
        self.status == AgentStatus::Idle && required.is_subset(&self.capabilities)
    }

    pub(crate) fn bind(&mut self, task_id: TaskId) -> Result<(), AgentError> {
        self.expect(AgentStatus::Idle)?;
        self.status = AgentStatus::Busy;
        self.current_task_id = Some(task_id);
        Ok(())
    }

    pub(crate) fn pause(&mut self) -> Result<(), AgentError> {
        self.expect(AgentStatus::Busy)?;
        self.status = AgentStatus::Paused;
        Ok(())
    }

    pub(crate) fn resume(&mut self) -> Result<(), AgentError> {
        self.expect(AgentStatus::Paused)?;
        self.status = AgentStatus::Busy;
        Ok(())
    }

    pub(crate) fn release(&mut self) -> Result<(), AgentError> {
        if self.status == AgentStatus::Idle {
            return Err(self.invalid_state("Busy or Paused"));
        }
        self.status = AgentStatus::Idle;
        self.current_task_id = None;
        Ok(())
    }

    /// Mutable memory, only while executing `task_id`
    pub(crate) fn memory_for(&mut self, task_id: TaskId) -> Result<&mut AgentMemory, AgentError> {
        if self.current_task_id != Some(task_id) {
            return Err(AgentError::NotBound {
                agent_id: self.id.clone(),
                task_id,
            });
        }
        Ok(&mut self.memory)
    }

    fn expect(&self, expected: AgentStatus) -> Result<(), AgentError> {
        if self.status != expected {
            return Err(self.invalid_state(expected.as_str()));
        }
        Ok(())
    }

    fn invalid_state(&self, expected: &str) -> AgentError {
        AgentError::InvalidState {
            agent_id: self.id.clone(),
            expected: expected.to_string(),
            actual: self.status,
        }
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewer() -> Agent {
        Agent::new("A1", capability_set(["code-analysis", "review"]))
    }

    fn assert_binding_invariant(agent: &Agent) {
        let bound = matches!(agent.status(), AgentStatus::Busy | AgentStatus::Paused);
        assert_eq!(agent.current_task_id().is_some(), bound);
    }

    #[test]
    fn new_agent_is_idle_without_task() {
        let agent = reviewer();
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert!(agent.current_task_id().is_none());
        assert_binding_invariant(&agent);
    }

    #[test]
    fn can_serve_requires_superset() {
        let agent = reviewer();
        assert!(agent.can_serve(&capability_set(["review"])));
        assert!(agent.can_serve(&CapabilitySet::new()));
        assert!(!agent.can_serve(&capability_set(["review", "testing"])));
    }

    #[test]
    fn busy_agent_cannot_serve() {
        let mut agent = reviewer();
        agent.bind(TaskId::new()).unwrap();
        assert!(!agent.can_serve(&capability_set(["review"])));
    }

    #[test]
    fn pause_resume_keeps_task() {
        let mut agent = reviewer();
        let task_id = TaskId::new();
        agent.bind(task_id).unwrap();

        agent.pause().unwrap();
        assert_eq!(agent.status(), AgentStatus::Paused);
        assert_eq!(agent.current_task_id(), Some(task_id));

        agent.resume().unwrap();
        assert_eq!(agent.status(), AgentStatus::Busy);
        assert_eq!(agent.current_task_id(), Some(task_id));
    }

    #[test]
    fn failed_transitions_leave_invariant_intact() {
        let mut agent = reviewer();

        assert!(agent.pause().is_err());
        assert!(agent.resume().is_err());
        assert!(agent.release().is_err());
        assert_binding_invariant(&agent);

        agent.bind(TaskId::new()).unwrap();
        assert!(agent.bind(TaskId::new()).is_err());
        assert!(agent.resume().is_err());
        assert_binding_invariant(&agent);

        agent.pause().unwrap();
        assert!(agent.pause().is_err());
        assert_binding_invariant(&agent);

        agent.release().unwrap();
        assert_eq!(agent.status(), AgentStatus::Idle);
        assert_binding_invariant(&agent);
    }

    #[test]
    fn memory_requires_current_task() {
        let mut agent = reviewer();
        let task_id = TaskId::new();
        assert!(matches!(
            agent.memory_for(task_id),
            Err(AgentError::NotBound { .. })
        ));

        agent.bind(task_id).unwrap();
        agent
            .memory_for(task_id)
            .unwrap()
            .working_memory
            .insert("file".to_string(), Value::from("main.rs"));
        assert_eq!(agent.memory().working_memory["file"], "main.rs");
    }

    #[test]
    fn short_term_memory_is_bounded() {
        let mut memory = AgentMemory::default();
        for i in 0..(SHORT_TERM_CAPACITY + 5) {
            memory.observe(Value::from(i));
        }
        assert_eq!(memory.short_term.len(), SHORT_TERM_CAPACITY);
        assert_eq!(memory.short_term.front(), Some(&Value::from(5)));
    }

    #[test]
    fn agent_status_json_format() {
        assert_eq!(serde_json::to_string(&AgentStatus::Busy).unwrap(), "\"Busy\"");
    }
}
