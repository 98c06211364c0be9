//! Agent registry for capability-matched workers
//!
//! The AgentRegistry is responsible for:
//! - Registering and de-registering agents
//! - Capability-based selection of idle agents
//! - Status transitions (bind, pause, resume, release)
//! - Publishing every status change on the event bus
//!
//! Agents are kept in registration order and searched linearly. The
//! population is expected to be tens of agents, not thousands.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::{Agent, AgentId, AgentStatus, CapabilitySet};
use crate::error::AgentError;
use crate::events::{ConductorEvent, EventBus};
use crate::task::TaskId;

/// Registry owning every known agent
pub struct AgentRegistry {
    agents: RwLock<Vec<Agent>>,
    event_bus: Arc<dyn EventBus>,
}

impl AgentRegistry {
    /// Create a new empty registry
    pub fn new(event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            event_bus,
        }
    }

    /// Register a new idle agent
    pub async fn register(&self, agent: Agent) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        if agents.iter().any(|a| a.id() == agent.id()) {
            return Err(AgentError::AlreadyRegistered(agent.id().clone()));
        }

        info!(agent_id = %agent.id(), capabilities = ?agent.capabilities(), "Agent registered");
        let event = ConductorEvent::AgentRegistered {
            agent_id: agent.id().clone(),
            capabilities: agent.capabilities().iter().cloned().collect(),
        };
        agents.push(agent);
        self.event_bus.publish(event).await;
        Ok(())
    }

    /// Remove an idle agent
    ///
    /// Fails with `InvalidState` while the agent is bound to a task.
    pub async fn deregister(&self, id: &AgentId) -> Result<Agent, AgentError> {
        let mut agents = self.agents.write().await;
        let index = agents
            .iter()
            .position(|a| a.id() == id)
            .ok_or_else(|| AgentError::NotFound(id.clone()))?;

        if agents[index].status() != AgentStatus::Idle {
            return Err(AgentError::InvalidState {
                agent_id: id.clone(),
                expected: AgentStatus::Idle.to_string(),
                actual: agents[index].status(),
            });
        }

        let agent = agents.remove(index);
        info!(agent_id = %id, "Agent deregistered");
        self.event_bus
            .publish(ConductorEvent::AgentDeregistered {
                agent_id: id.clone(),
            })
            .await;
        Ok(agent)
    }

    /// Snapshot of one agent
    pub async fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents.read().await.iter().find(|a| a.id() == id).cloned()
    }

    /// Snapshot of all agents in registration order
    pub async fn list(&self) -> Vec<Agent> {
        self.agents.read().await.clone()
    }

    /// First idle agent, in registration order, holding every required capability
    pub async fn find_available(&self, required: &CapabilitySet) -> Option<Agent> {
        self.agents
            .read()
            .await
            .iter()
            .find(|a| a.can_serve(required))
            .cloned()
    }

    /// Find an available agent and bind it to `task_id` in one step
    ///
    /// No other caller can bind the chosen agent between the search and
    /// the bind. Returns `None` when no agent qualifies.
    pub async fn claim(&self, required: &CapabilitySet, task_id: TaskId) -> Option<AgentId> {
        let mut agents = self.agents.write().await;
        let agent = agents.iter_mut().find(|a| a.can_serve(required))?;
        // can_serve guarantees Idle, so bind cannot fail here
        agent.bind(task_id).ok()?;
        let id = agent.id().clone();
        self.publish_status(agent).await;
        Some(id)
    }

    /// Bind an idle agent to a task
    pub async fn bind(&self, id: &AgentId, task_id: TaskId) -> Result<(), AgentError> {
        self.transition(id, |agent| agent.bind(task_id)).await
    }

    /// Busy -> Paused, keeping the bound task
    pub async fn pause(&self, id: &AgentId) -> Result<(), AgentError> {
        self.transition(id, Agent::pause).await
    }

    /// Paused -> Busy, keeping the bound task
    pub async fn resume(&self, id: &AgentId) -> Result<(), AgentError> {
        self.transition(id, Agent::resume).await
    }

    /// Busy or Paused -> Idle, clearing the bound task
    pub async fn release(&self, id: &AgentId) -> Result<(), AgentError> {
        self.transition(id, Agent::release).await
    }

    /// Append an observation to the agent's short-term memory
    ///
    /// Only the task the agent is executing may write its memory.
    pub async fn observe(
        &self,
        id: &AgentId,
        task_id: TaskId,
        observation: Value,
    ) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        let agent = find_mut(&mut agents, id)?;
        agent.memory_for(task_id)?.observe(observation);
        Ok(())
    }

    /// Set a working-memory entry for the agent's current task
    pub async fn remember(
        &self,
        id: &AgentId,
        task_id: TaskId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, AgentError> {
        let mut agents = self.agents.write().await;
        let agent = find_mut(&mut agents, id)?;
        Ok(agent.memory_for(task_id)?.working_memory.insert(key.into(), value))
    }

    /// Read a working-memory entry
    pub async fn recall(&self, id: &AgentId, key: &str) -> Result<Option<Value>, AgentError> {
        let agents = self.agents.read().await;
        let agent = agents
            .iter()
            .find(|a| a.id() == id)
            .ok_or_else(|| AgentError::NotFound(id.clone()))?;
        Ok(agent.memory().working_memory.get(key).cloned())
    }

    /// Agents depending on `server`, with the task each is bound to
    pub async fn dependents_of(&self, server: &str) -> Vec<(AgentId, Option<TaskId>)> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|a| a.server() == Some(server))
            .map(|a| (a.id().clone(), a.current_task_id()))
            .collect()
    }

    /// Apply a status transition under the write lock and publish the result
    async fn transition<F>(&self, id: &AgentId, apply: F) -> Result<(), AgentError>
    where
        F: FnOnce(&mut Agent) -> Result<(), AgentError>,
    {
        let mut agents = self.agents.write().await;
        let agent = find_mut(&mut agents, id)?;
        let before = agent.status();
        apply(agent)?;
        debug!(agent_id = %id, from = %before, to = %agent.status(), "Agent transition");
        self.publish_status(agent).await;
        Ok(())
    }

    async fn publish_status(&self, agent: &Agent) {
        self.event_bus
            .publish(ConductorEvent::AgentStatusChanged {
                agent_id: agent.id().clone(),
                status: agent.status(),
                task_id: agent.current_task_id(),
            })
            .await;
    }
}

fn find_mut<'a>(agents: &'a mut [Agent], id: &AgentId) -> Result<&'a mut Agent, AgentError> {
    agents
        .iter_mut()
        .find(|a| a.id() == id)
        .ok_or_else(|| AgentError::NotFound(id.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::capability_set;
    use crate::events::{EventKind, MemoryEventBus};

    fn create_registry() -> (AgentRegistry, Arc<MemoryEventBus>) {
        let bus = Arc::new(MemoryEventBus::new(100));
        (AgentRegistry::new(bus.clone()), bus)
    }

    fn agent(id: &str, caps: &[&str]) -> Agent {
        Agent::new(id, capability_set(caps.iter().copied()))
    }

    async fn assert_invariant(registry: &AgentRegistry) {
        for agent in registry.list().await {
            let bound = matches!(agent.status(), AgentStatus::Busy | AgentStatus::Paused);
            assert_eq!(
                agent.current_task_id().is_some(),
                bound,
                "binding invariant broken for {}",
                agent.id()
            );
        }
    }

    // ===== Registration Tests =====

    #[tokio::test]
    async fn register_inserts_idle_agent() {
        let (registry, _) = create_registry();
        registry.register(agent("A1", &["review"])).await.unwrap();

        let stored = registry.get(&AgentId::new("A1")).await.unwrap();
        assert_eq!(stored.status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn register_duplicate_id_fails() {
        let (registry, _) = create_registry();
        registry.register(agent("A1", &["review"])).await.unwrap();

        let result = registry.register(agent("A1", &["testing"])).await;

        assert_eq!(
            result,
            Err(AgentError::AlreadyRegistered(AgentId::new("A1")))
        );
        let stored = registry.get(&AgentId::new("A1")).await.unwrap();
        assert!(stored.capabilities().contains("review"));
    }

    #[tokio::test]
    async fn deregister_busy_agent_fails() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        registry.register(agent("A1", &[])).await.unwrap();
        registry.bind(&id, TaskId::new()).await.unwrap();

        let result = registry.deregister(&id).await;

        assert!(matches!(result, Err(AgentError::InvalidState { .. })));
        assert!(registry.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn deregister_idle_agent_removes_it() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        registry.register(agent("A1", &[])).await.unwrap();

        registry.deregister(&id).await.unwrap();

        assert!(registry.get(&id).await.is_none());
        assert_eq!(
            registry.deregister(&id).await,
            Err(AgentError::NotFound(id))
        );
    }

    // ===== Selection Tests =====

    #[tokio::test]
    async fn find_available_uses_registration_order() {
        let (registry, _) = create_registry();
        registry.register(agent("first", &["review", "extra"])).await.unwrap();
        registry.register(agent("second", &["review"])).await.unwrap();

        let found = registry
            .find_available(&capability_set(["review"]))
            .await
            .unwrap();

        assert_eq!(found.id(), &AgentId::new("first"));
    }

    #[tokio::test]
    async fn find_available_skips_busy_and_partial_matches() {
        let (registry, _) = create_registry();
        registry.register(agent("busy", &["review", "code-analysis"])).await.unwrap();
        registry.register(agent("partial", &["review"])).await.unwrap();
        registry.register(agent("match", &["code-analysis", "review"])).await.unwrap();
        registry
            .bind(&AgentId::new("busy"), TaskId::new())
            .await
            .unwrap();

        let required = capability_set(["code-analysis", "review"]);
        let found = registry.find_available(&required).await.unwrap();

        assert_eq!(found.id(), &AgentId::new("match"));
        assert!(required.is_subset(found.capabilities()));
    }

    #[tokio::test]
    async fn find_available_returns_none_without_match() {
        let (registry, _) = create_registry();
        registry.register(agent("A1", &["review"])).await.unwrap();

        assert!(
            registry
                .find_available(&capability_set(["debugging"]))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn claim_binds_only_once() {
        let (registry, _) = create_registry();
        registry.register(agent("A1", &["general"])).await.unwrap();
        let required = capability_set(["general"]);

        let first = registry.claim(&required, TaskId::new()).await;
        let second = registry.claim(&required, TaskId::new()).await;

        assert_eq!(first, Some(AgentId::new("A1")));
        assert_eq!(second, None);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_an_agent() {
        let (registry, _) = create_registry();
        let registry = Arc::new(registry);
        registry.register(agent("A1", &["general"])).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .claim(&capability_set(["general"]), TaskId::new())
                        .await
                })
            })
            .collect();

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    // ===== Transition Tests =====

    #[tokio::test]
    async fn bind_pause_resume_release_cycle() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        let task_id = TaskId::new();
        registry.register(agent("A1", &[])).await.unwrap();

        registry.bind(&id, task_id).await.unwrap();
        registry.pause(&id).await.unwrap();
        let paused = registry.get(&id).await.unwrap();
        assert_eq!(paused.status(), AgentStatus::Paused);
        assert_eq!(paused.current_task_id(), Some(task_id));

        registry.resume(&id).await.unwrap();
        registry.release(&id).await.unwrap();
        let idle = registry.get(&id).await.unwrap();
        assert_eq!(idle.status(), AgentStatus::Idle);
        assert!(idle.current_task_id().is_none());
    }

    #[tokio::test]
    async fn release_from_paused_is_allowed() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        registry.register(agent("A1", &[])).await.unwrap();
        registry.bind(&id, TaskId::new()).await.unwrap();
        registry.pause(&id).await.unwrap();

        registry.release(&id).await.unwrap();

        assert_eq!(registry.get(&id).await.unwrap().status(), AgentStatus::Idle);
    }

    #[tokio::test]
    async fn invariant_holds_after_failed_operations() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        registry.register(agent("A1", &[])).await.unwrap();

        assert!(registry.pause(&id).await.is_err());
        assert!(registry.release(&id).await.is_err());
        assert_invariant(&registry).await;

        registry.bind(&id, TaskId::new()).await.unwrap();
        assert!(registry.bind(&id, TaskId::new()).await.is_err());
        assert!(registry.resume(&id).await.is_err());
        assert!(registry.deregister(&id).await.is_err());
        assert_invariant(&registry).await;

        assert!(registry.pause(&AgentId::new("ghost")).await.is_err());
        assert_invariant(&registry).await;
    }

    #[tokio::test]
    async fn status_changes_are_published() {
        let (registry, bus) = create_registry();
        let mut agents = bus.subscribe_kind(EventKind::Agent);
        let id = AgentId::new("A1");
        let task_id = TaskId::new();
        registry.register(agent("A1", &[])).await.unwrap();
        registry.bind(&id, task_id).await.unwrap();

        let (_, registered) = agents.recv().await.unwrap();
        let (_, bound) = agents.recv().await.unwrap();

        assert!(matches!(registered, ConductorEvent::AgentRegistered { .. }));
        assert_eq!(
            bound,
            ConductorEvent::AgentStatusChanged {
                agent_id: id,
                status: AgentStatus::Busy,
                task_id: Some(task_id),
            }
        );
    }

    // ===== Memory Tests =====

    #[tokio::test]
    async fn memory_writes_require_bound_task() {
        let (registry, _) = create_registry();
        let id = AgentId::new("A1");
        let task_id = TaskId::new();
        registry.register(agent("A1", &[])).await.unwrap();

        let denied = registry
            .remember(&id, task_id, "cursor", Value::from(3))
            .await;
        assert!(matches!(denied, Err(AgentError::NotBound { .. })));

        registry.bind(&id, task_id).await.unwrap();
        registry
            .remember(&id, task_id, "cursor", Value::from(3))
            .await
            .unwrap();
        registry
            .observe(&id, task_id, Value::from("opened main.rs"))
            .await
            .unwrap();

        assert_eq!(
            registry.recall(&id, "cursor").await.unwrap(),
            Some(Value::from(3))
        );
        let stored = registry.get(&id).await.unwrap();
        assert_eq!(stored.memory().short_term.len(), 1);
    }

    #[tokio::test]
    async fn dependents_of_reports_bound_tasks() {
        let (registry, _) = create_registry();
        let task_id = TaskId::new();
        registry
            .register(agent("linter", &["lint"]).with_server("lint-server"))
            .await
            .unwrap();
        registry.register(agent("other", &["lint"])).await.unwrap();
        registry
            .bind(&AgentId::new("linter"), task_id)
            .await
            .unwrap();

        let dependents = registry.dependents_of("lint-server").await;

        assert_eq!(dependents, vec![(AgentId::new("linter"), Some(task_id))]);
    }
}
