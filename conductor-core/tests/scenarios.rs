//! End-to-end scenarios across dispatcher, task manager, registry and
//! supervisor

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use conductor_core::{
    Agent, AgentId, AgentRegistry, AgentStatus, ConductorEvent, Dispatcher, Envelope, EventBus,
    EventKind, MemoryEventBus, MemoryTaskRepository, ProcessSupervisor, ServerConfig,
    StaticAnalyzer, SupervisorConfig, TaskId, TaskManager, TaskProgress, TaskSpec, TaskStatus,
    ToolRegistry, UnconfiguredBrowser, capability_set,
};

struct Harness {
    bus: Arc<dyn EventBus>,
    tasks: Arc<TaskManager>,
    dispatcher: Dispatcher,
}

fn harness() -> Harness {
    let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new(1024));
    let agents = Arc::new(AgentRegistry::new(bus.clone()));
    let tasks = Arc::new(TaskManager::new(
        Arc::new(MemoryTaskRepository::new()),
        agents,
        Arc::new(StaticAnalyzer::default()),
        bus.clone(),
    ));
    let dispatcher = Dispatcher::new(
        tasks.clone(),
        Arc::new(UnconfiguredBrowser),
        Arc::new(ToolRegistry::with_builtins()),
    );
    Harness {
        bus,
        tasks,
        dispatcher,
    }
}

fn one_step() -> TaskProgress {
    TaskProgress {
        current: 1,
        total: 1,
        steps: Vec::new(),
    }
}

#[tokio::test]
async fn code_review_message_runs_on_matching_agent() {
    let h = harness();
    assert_ok!(
        h.tasks
            .agents()
            .register(Agent::new("A1", capability_set(["code-analysis", "review"])))
            .await
    );

    let reply = h
        .dispatcher
        .handle_line(r#"{"type":"AGENT_TASK","payload":{"type":"CODE_REVIEW"},"requestId":"r1"}"#)
        .await;
    let reply = serde_json::to_value(&reply).unwrap();

    assert_eq!(reply["requestId"], "r1");
    assert_eq!(reply["result"]["agentId"], "A1");
    let task_id: TaskId = serde_json::from_value(reply["result"]["taskId"].clone()).unwrap();
    let task = h.tasks.get(task_id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Running);
    assert_eq!(task.agent_id(), Some(&AgentId::new("A1")));
    let agent = h.tasks.agents().get(&AgentId::new("A1")).await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Busy);
}

#[tokio::test]
async fn pending_task_starts_once_an_agent_frees_up() {
    let h = harness();
    h.tasks
        .agents()
        .register(Agent::new("solo", capability_set(["general"])))
        .await
        .unwrap();
    let first = h
        .tasks
        .create_and_start(TaskSpec::new("first", ""))
        .await
        .unwrap();
    let second = h.tasks.create(TaskSpec::new("second", "")).await.unwrap();
    assert_err!(h.tasks.start(second.id()).await);

    h.tasks.update_progress(first.id(), one_step()).await.unwrap();
    let second = assert_ok!(h.tasks.start(second.id()).await);

    assert_eq!(second.agent_id(), Some(&AgentId::new("solo")));
}

#[tokio::test]
async fn status_events_follow_the_task() {
    let h = harness();
    let mut task_events = h.bus.subscribe_kind(EventKind::Task);
    h.tasks
        .agents()
        .register(Agent::new("A1", capability_set(["general"])))
        .await
        .unwrap();

    let task = h
        .tasks
        .create_and_start(TaskSpec::new("work", ""))
        .await
        .unwrap();
    h.tasks.pause(task.id()).await.unwrap();
    h.tasks.resume(task.id()).await.unwrap();
    h.tasks.update_progress(task.id(), one_step()).await.unwrap();

    let mut statuses = Vec::new();
    while statuses.len() < 4 {
        let (_, event) = task_events.recv().await.unwrap();
        if let ConductorEvent::TaskStatusChanged { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Running,
            TaskStatus::Paused,
            TaskStatus::Running,
            TaskStatus::Completed
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn server_exit_fails_task_and_frees_agent() {
    let h = harness();
    let configs = HashMap::from([(
        "lint-server".to_string(),
        ServerConfig::new("sh").with_args(["-c", "echo 'Server ready'; sleep 0.5; exit 2"]),
    )]);
    let supervisor = ProcessSupervisor::new(configs, SupervisorConfig::default(), h.bus.clone());
    let watcher = h.tasks.clone().watch_server_exits(supervisor.subscribe_exits().await);

    h.tasks
        .agents()
        .register(Agent::new("linter", capability_set(["lint"])).with_server("lint-server"))
        .await
        .unwrap();
    supervisor.start("lint-server").await.unwrap();
    let task = h
        .tasks
        .create_and_start(TaskSpec::new("lint", "").with_capabilities(capability_set(["lint"])))
        .await
        .unwrap();

    let failed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = h.tasks.get(task.id()).await.unwrap();
            if task.status() == TaskStatus::Failed {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task was not failed by the server exit");

    assert!(!failed.error().unwrap_or_default().is_empty());
    assert!(failed.agent_id().is_none());
    let agent = h.tasks.agents().get(&AgentId::new("linter")).await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert!(!supervisor.is_running("lint-server").await);
    watcher.abort();
}

#[cfg(unix)]
#[tokio::test]
async fn server_exit_is_handled_while_output_floods_the_bus() {
    // Far smaller than the output the chatty server produces
    let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new(8));
    let agents = Arc::new(AgentRegistry::new(bus.clone()));
    let tasks = Arc::new(TaskManager::new(
        Arc::new(MemoryTaskRepository::new()),
        agents,
        Arc::new(StaticAnalyzer::default()),
        bus.clone(),
    ));
    let configs = HashMap::from([
        (
            "lint-server".to_string(),
            ServerConfig::new("sh").with_args(["-c", "echo 'Server ready'; sleep 0.5; exit 2"]),
        ),
        (
            "chatty".to_string(),
            ServerConfig::new("sh").with_args([
                "-c",
                "echo 'Server ready'; sleep 0.3; i=0; while [ $i -lt 2000 ]; do echo line $i; i=$((i+1)); done; exec sleep 30",
            ]),
        ),
    ]);
    let supervisor = ProcessSupervisor::new(configs, SupervisorConfig::default(), bus.clone());
    let watcher = tasks
        .clone()
        .watch_server_exits(supervisor.subscribe_exits().await);

    tasks
        .agents()
        .register(Agent::new("linter", capability_set(["lint"])).with_server("lint-server"))
        .await
        .unwrap();
    supervisor.start("lint-server").await.unwrap();
    supervisor.start("chatty").await.unwrap();
    let task = tasks
        .create_and_start(TaskSpec::new("lint", "").with_capabilities(capability_set(["lint"])))
        .await
        .unwrap();

    let failed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let task = tasks.get(task.id()).await.unwrap();
            if task.status() == TaskStatus::Failed {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("exit was lost behind server output");

    assert!(failed.agent_id().is_none());
    let agent = tasks.agents().get(&AgentId::new("linter")).await.unwrap();
    assert_eq!(agent.status(), AgentStatus::Idle);
    watcher.abort();
    supervisor.stop_all().await.unwrap();
}

#[tokio::test]
async fn tool_and_unknown_messages_share_one_connection() {
    let h = harness();
    let lines = [
        Envelope::new("MCP_REQUEST", json!({"method": "model.load", "params": {"modelId": "m1"}})),
        Envelope::new("SHUTDOWN", json!({})),
        Envelope::new("MCP_REQUEST", json!({"method": "model.generate", "params": {}})),
    ];

    let mut replies = Vec::new();
    for envelope in lines {
        replies.push(h.dispatcher.dispatch(envelope).await);
    }

    assert!(!replies[0].is_error());
    assert_eq!(replies[1].code(), Some("UnknownMessageType"));
    assert!(!replies[2].is_error());
}
