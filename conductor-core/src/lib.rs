//! conductor-core: capability-matched task routing and tool-server supervision
//!
//! This crate provides the coordinating components of conductor:
//!
//! - **Agent registry** - [`AgentRegistry`] owns capability-tagged agents and binds them to tasks
//! - **Task lifecycle** - [`TaskManager`] enforces the task state machine
//! - **Process supervision** - [`ProcessSupervisor`] starts, stops and watches tool servers
//! - **Dispatch** - [`Dispatcher`] routes inbound messages to the owning component
//! - **Event system** - [`EventBus`] trait and [`MemoryEventBus`] for status feeds
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use conductor_core::{
//!     Agent, AgentRegistry, EventBus, MemoryEventBus, MemoryTaskRepository, StaticAnalyzer,
//!     TaskManager, TaskSpec, capability_set,
//! };
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::default());
//!     let agents = Arc::new(AgentRegistry::new(bus.clone()));
//!     agents
//!         .register(Agent::new("A1", capability_set(["code-analysis", "review"])))
//!         .await?;
//!
//!     let tasks = TaskManager::new(
//!         Arc::new(MemoryTaskRepository::new()),
//!         agents,
//!         Arc::new(StaticAnalyzer::default()),
//!         bus,
//!     );
//!     let spec = TaskSpec::new("review", "review the parser")
//!         .with_capabilities(capability_set(["code-analysis", "review"]));
//!     let task = tasks.create_and_start(spec).await?;
//!     println!("{} is running on {:?}", task.id(), task.agent_id());
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! inbound message
//!       │
//!       ▼
//! ┌────────────┐    ┌─────────────┐    ┌───────────────┐
//! │ Dispatcher │───▶│ TaskManager │───▶│ AgentRegistry │
//! └────────────┘    └─────────────┘    └───────────────┘
//!       │                  ▲
//!       ▼                  │ server_exit
//!  browser / tools   ┌───────────────────┐
//!                    │ ProcessSupervisor │
//!                    └───────────────────┘
//! ```

pub mod agent;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod supervisor;
pub mod task;

// Re-export key types for convenience
pub use agent::{Agent, AgentId, AgentRegistry, AgentStatus, CapabilitySet, capability_set};
pub use dispatch::{
    BrowserAction, BrowserAutomation, Dispatcher, Envelope, Reply, TaskType, ToolMethod,
    ToolRegistry, UnconfiguredBrowser,
};
pub use error::{
    AgentError, AnalyzerError, AutomationError, ConductorError, DispatchError, RepositoryError,
    SupervisorError, TaskError, ToolError,
};
pub use events::{ConductorEvent, EventBus, EventKind, MemoryEventBus, TopicReceiver};
pub use supervisor::{
    ExitNotice, OutputStream, ProcessSupervisor, RestartPolicy, ServerConfig, ServerState,
    SupervisorConfig,
};
pub use task::{
    MemoryTaskRepository, StaticAnalyzer, Task, TaskAnalysis, TaskAnalyzer, TaskId, TaskManager,
    TaskProgress, TaskRepository, TaskSpec, TaskStatus,
};
