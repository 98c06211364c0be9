//! Task persistence seam
//!
//! The task manager treats storage as a repository with create / find /
//! save semantics. One manager operation is one transactional unit.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{Task, TaskId};
use crate::error::RepositoryError;

/// Storage for task records
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new task
    async fn insert(&self, task: Task) -> Result<(), RepositoryError>;

    /// Look up a task by ID
    async fn find(&self, id: TaskId) -> Result<Option<Task>, RepositoryError>;

    /// Overwrite an existing task
    async fn save(&self, task: &Task) -> Result<(), RepositoryError>;

    /// All tasks in insertion order
    async fn list(&self) -> Result<Vec<Task>, RepositoryError>;
}

#[derive(Default)]
struct Records {
    by_id: HashMap<TaskId, Task>,
    order: Vec<TaskId>,
}

/// In-memory task repository
#[derive(Default)]
pub struct MemoryTaskRepository {
    records: RwLock<Records>,
}

impl MemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for MemoryTaskRepository {
    async fn insert(&self, task: Task) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        if records.by_id.contains_key(&task.id) {
            return Err(RepositoryError::Duplicate(task.id));
        }
        records.order.push(task.id);
        records.by_id.insert(task.id, task);
        Ok(())
    }

    async fn find(&self, id: TaskId) -> Result<Option<Task>, RepositoryError> {
        Ok(self.records.read().await.by_id.get(&id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        let stored = records
            .by_id
            .get_mut(&task.id)
            .ok_or(RepositoryError::Missing(task.id))?;
        *stored = task.clone();
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Task>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .order
            .iter()
            .filter_map(|id| records.by_id.get(id).cloned())
            .collect())
    }
}
