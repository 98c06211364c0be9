//! TaskManager: owner of the task state machine
//!
//! Every mutation runs under one manager-wide lock, so operations on tasks
//! are totally ordered and each one is a single transaction against the
//! repository. Calls that may suspend for a long time (the analyzer) run
//! before the lock is taken.
//!
//! Lock order is always task lock, then agent registry lock. The registry
//! never calls back into the manager.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::analyzer::TaskAnalyzer;
use super::repository::TaskRepository;
use super::types::{Task, TaskId, TaskProgress, TaskSpec, TaskStatus};
use crate::agent::{AgentId, AgentRegistry};
use crate::error::{TaskError, exit_label};
use crate::events::{ConductorEvent, EventBus};
use crate::supervisor::ExitNotice;

/// Manages task records and binds them to agents
pub struct TaskManager {
    repository: Arc<dyn TaskRepository>,
    agents: Arc<AgentRegistry>,
    analyzer: Arc<dyn TaskAnalyzer>,
    event_bus: Arc<dyn EventBus>,
    /// Serializes mutations and snapshot reads
    lock: Mutex<()>,
}

impl TaskManager {
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        agents: Arc<AgentRegistry>,
        analyzer: Arc<dyn TaskAnalyzer>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            repository,
            agents,
            analyzer,
            event_bus,
            lock: Mutex::new(()),
        }
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Create a `Pending` task
    ///
    /// Capabilities come from `TaskSpec::capabilities` when given, otherwise from the
    /// analyzer. A parent task, if named, must already exist.
    #[instrument(name = "task::create", skip(self, spec), fields(name = %spec.name))]
    pub async fn create(&self, mut spec: TaskSpec) -> Result<Task, TaskError> {
        let (capabilities, metadata) = match spec.capabilities.take() {
            Some(capabilities) => (capabilities, Value::Null),
            None => {
                let analysis = self.analyzer.analyze(&spec.description).await?;
                let capabilities = analysis.capabilities();
                let metadata = json!({
                    "analysis": analysis.details,
                    "estimatedSteps": analysis.steps,
                });
                (capabilities, metadata)
            }
        };

        let _guard = self.lock.lock().await;

        if let Some(parent) = spec.parent_task_id
            && self.repository.find(parent).await?.is_none()
        {
            return Err(TaskError::ParentNotFound(parent));
        }

        let task = Task::new(spec, capabilities, metadata);
        self.repository.insert(task.clone()).await?;

        info!(task_id = %task.id, capabilities = ?task.capabilities, "Task created");
        self.event_bus
            .publish(ConductorEvent::TaskCreated {
                task_id: task.id,
                name: task.name.clone(),
                parent_task_id: task.parent_task_id,
            })
            .await;
        Ok(task)
    }

    /// Bind a `Pending` task to an available agent and mark it `Running`
    ///
    /// When no agent qualifies the task stays `Pending` and
    /// `NoAgentAvailable` is returned for the caller to retry later.
    #[instrument(name = "task::start", skip(self), fields(task_id = %id))]
    pub async fn start(&self, id: TaskId) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        let mut task = self.load(id).await?;
        task.expect(TaskStatus::Pending, "start")?;

        let Some(agent_id) = self.agents.claim(&task.capabilities, id).await else {
            info!(capabilities = ?task.capabilities, "No agent available, task stays pending");
            return Err(TaskError::NoAgentAvailable {
                task_id: id,
                capabilities: task.capabilities.iter().cloned().collect(),
            });
        };

        task.start(agent_id.clone(), Utc::now())?;
        if let Err(e) = self.repository.save(&task).await {
            self.compensate(&agent_id, "release", self.agents.release(&agent_id).await);
            return Err(e.into());
        }

        info!(agent_id = %agent_id, "Task started");
        self.publish_status(&task).await;
        Ok(task)
    }

    /// Create a task and immediately try to start it
    ///
    /// A task that finds no agent is still created and left `Pending`.
    pub async fn create_and_start(&self, spec: TaskSpec) -> Result<Task, TaskError> {
        let task = self.create(spec).await?;
        self.start(task.id).await
    }

    /// Running -> Paused, pausing the bound agent too
    #[instrument(name = "task::pause", skip(self), fields(task_id = %id))]
    pub async fn pause(&self, id: TaskId) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        let mut task = self.load(id).await?;
        task.pause(Utc::now())?;
        let agent_id = bound_agent(&task)?;

        self.agents.pause(&agent_id).await?;
        if let Err(e) = self.repository.save(&task).await {
            self.compensate(&agent_id, "resume", self.agents.resume(&agent_id).await);
            return Err(e.into());
        }

        info!("Task paused");
        self.publish_status(&task).await;
        Ok(task)
    }

    /// Paused -> Running with the same agent
    #[instrument(name = "task::resume", skip(self), fields(task_id = %id))]
    pub async fn resume(&self, id: TaskId) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        let mut task = self.load(id).await?;
        task.resume(Utc::now())?;
        let agent_id = bound_agent(&task)?;

        self.agents.resume(&agent_id).await?;
        if let Err(e) = self.repository.save(&task).await {
            self.compensate(&agent_id, "pause", self.agents.pause(&agent_id).await);
            return Err(e.into());
        }

        info!("Task resumed");
        self.publish_status(&task).await;
        Ok(task)
    }

    /// Merge progress into a `Running` task
    ///
    /// Reaching `current == total` completes the task and releases its
    /// agent before the lock is dropped, so no reader can observe a
    /// completed task whose agent is still busy.
    #[instrument(name = "task::progress", skip(self, progress), fields(task_id = %id))]
    pub async fn update_progress(&self, id: TaskId, progress: TaskProgress) -> Result<Task, TaskError> {
        if progress.current > progress.total {
            return Err(TaskError::InvalidProgress {
                current: progress.current,
                total: progress.total,
            });
        }

        let _guard = self.lock.lock().await;
        let mut task = self.load(id).await?;
        task.expect(TaskStatus::Running, "update progress of")?;
        task.progress.merge(progress);
        task.updated_at = Utc::now();

        if !task.progress.is_complete() {
            self.repository.save(&task).await?;
            debug!(current = task.progress.current, total = task.progress.total, "Task progress");
            return Ok(task);
        }

        let agent_id = bound_agent(&task)?;
        let result = Value::Array(task.progress.outputs());
        task.complete(result, Utc::now())?;

        self.agents.release(&agent_id).await?;
        if let Err(e) = self.repository.save(&task).await {
            self.compensate(&agent_id, "rebind", self.agents.bind(&agent_id, id).await);
            return Err(e.into());
        }

        info!(agent_id = %agent_id, "Task completed");
        self.publish_status(&task).await;
        Ok(task)
    }

    /// Running|Paused -> Failed, releasing the bound agent
    #[instrument(name = "task::fail", skip(self, reason), fields(task_id = %id))]
    pub async fn fail(&self, id: TaskId, reason: impl Into<String>) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        let mut task = self.load(id).await?;
        let was_paused = task.status == TaskStatus::Paused;
        let agent_id = if task.status.is_active() {
            Some(bound_agent(&task)?)
        } else {
            None
        };
        let reason = reason.into();
        task.fail(reason.clone(), Utc::now())?;

        if let Some(agent_id) = &agent_id {
            self.agents.release(agent_id).await?;
        }
        if let Err(e) = self.repository.save(&task).await {
            if let Some(agent_id) = &agent_id {
                self.restore_binding(agent_id, id, was_paused).await;
            }
            return Err(e.into());
        }

        warn!(reason = %reason, "Task failed");
        self.publish_status(&task).await;
        Ok(task)
    }

    /// Snapshot of one task
    pub async fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        let _guard = self.lock.lock().await;
        self.load(id).await
    }

    /// The task followed by its direct children, oldest first
    pub async fn list_children(&self, id: TaskId) -> Result<Vec<Task>, TaskError> {
        let _guard = self.lock.lock().await;
        self.load(id).await?;

        let mut tasks: Vec<Task> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|t| t.id == id || t.parent_task_id == Some(id))
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    /// Running and paused tasks, newest first
    pub async fn list_active(&self) -> Result<Vec<Task>, TaskError> {
        let _guard = self.lock.lock().await;
        let mut tasks: Vec<Task> = self
            .repository
            .list()
            .await?
            .into_iter()
            .rev()
            .filter(|t| t.status.is_active())
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// Fail every task whose agent depends on a server that just exited
    ///
    /// Returns the IDs of the tasks that were failed.
    pub async fn handle_server_exit(&self, server: &str, code: Option<i32>) -> Vec<TaskId> {
        let reason = format!("tool server '{server}' exited ({})", exit_label(&code));
        let mut failed = Vec::new();

        for (agent_id, task_id) in self.agents.dependents_of(server).await {
            let Some(task_id) = task_id else { continue };
            match self.fail(task_id, reason.clone()).await {
                Ok(_) => {
                    warn!(task_id = %task_id, agent_id = %agent_id, server, "Task failed by server exit");
                    failed.push(task_id);
                }
                // The task finished between the lookup and the failure
                Err(TaskError::InvalidTransition { .. }) => {
                    debug!(task_id = %task_id, "Task no longer active on server exit");
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to fail task on server exit"),
            }
        }
        failed
    }

    /// Fail dependent tasks for every exit notice received
    ///
    /// Takes the supervisor's lossless exit channel rather than the event
    /// bus, whose subscribers may lag behind server output and drop events.
    pub fn watch_server_exits(
        self: Arc<Self>,
        mut exits: mpsc::UnboundedReceiver<ExitNotice>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(ExitNotice { name, code }) = exits.recv().await {
                self.handle_server_exit(&name, code).await;
            }
            debug!("Exit channel closed, server exit watcher stopping");
        })
    }

    async fn load(&self, id: TaskId) -> Result<Task, TaskError> {
        self.repository
            .find(id)
            .await?
            .ok_or(TaskError::NotFound(id))
    }

    async fn publish_status(&self, task: &Task) {
        self.event_bus
            .publish(ConductorEvent::TaskStatusChanged {
                task_id: task.id,
                status: task.status,
                agent_id: task.agent_id.clone(),
            })
            .await;
    }

    /// Put a released agent back on its task after a failed save
    async fn restore_binding(&self, agent_id: &AgentId, task_id: TaskId, paused: bool) {
        let mut outcome = self.agents.bind(agent_id, task_id).await;
        if outcome.is_ok() && paused {
            outcome = self.agents.pause(agent_id).await;
        }
        self.compensate(agent_id, "rebind", outcome);
    }

    fn compensate<E: std::fmt::Display>(&self, agent_id: &AgentId, action: &str, outcome: Result<(), E>) {
        if let Err(e) = outcome {
            warn!(agent_id = %agent_id, action, error = %e, "Compensating agent transition failed");
        }
    }
}

fn bound_agent(task: &Task) -> Result<AgentId, TaskError> {
    task.agent_id.clone().ok_or(TaskError::InvalidTransition {
        task_id: task.id,
        from: task.status,
        action: "use the agent of",
    })
}
