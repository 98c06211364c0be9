//! Task lifecycle for conductor
//!
//! - Task records, IDs and the status state machine
//! - Capability analysis seam ([`TaskAnalyzer`])
//! - Storage seam ([`TaskRepository`])
//! - [`TaskManager`], which binds tasks to agents

pub mod analyzer;
pub mod manager;
pub mod repository;
pub mod types;

pub use analyzer::{StaticAnalyzer, TaskAnalysis, TaskAnalyzer};
pub use manager::TaskManager;
pub use repository::{MemoryTaskRepository, TaskRepository};
pub use types::{ProgressStep, Task, TaskId, TaskProgress, TaskSpec, TaskStatus};
