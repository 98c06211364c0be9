//! Dispatcher: routes inbound messages to the owning component
//!
//! Every message gets exactly one [`Reply`]. Failures from downstream
//! components become error replies; nothing a client sends can end the
//! dispatch loop.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::browser::{BrowserAction, BrowserAutomation};
use super::classify::TaskType;
use super::envelope::{Envelope, MessageType, Reply};
use super::tools::{ToolRegistry, ToolRequest};
use crate::error::DispatchError;
use crate::task::{TaskId, TaskManager, TaskSpec};

/// Payload of an `AGENT_TASK` message
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentTaskRequest {
    #[serde(rename = "type")]
    task_type: Option<String>,
    name: Option<String>,
    #[serde(default)]
    description: String,
    parent_task_id: Option<TaskId>,
}

/// Routes envelopes to tasks, the browser, or the tool-method table
pub struct Dispatcher {
    tasks: Arc<TaskManager>,
    browser: Arc<dyn BrowserAutomation>,
    tools: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(
        tasks: Arc<TaskManager>,
        browser: Arc<dyn BrowserAutomation>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            tasks,
            browser,
            tools,
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Route one envelope and build its reply
    pub async fn dispatch(&self, envelope: Envelope) -> Reply {
        let request_id = envelope.request_id.clone();
        match self.route(&envelope.message_type, envelope.payload).await {
            Ok(result) => Reply::success(result, request_id),
            Err(e) => {
                warn!(message_type = %envelope.message_type, code = e.code(), error = %e, "Dispatch failed");
                Reply::error(&e, request_id)
            }
        }
    }

    /// Route a message by type to its handler
    pub async fn route(&self, message_type: &str, payload: Value) -> Result<Value, DispatchError> {
        let Some(kind) = MessageType::parse(message_type) else {
            return Err(DispatchError::UnknownMessageType(message_type.to_string()));
        };
        debug!(message_type = kind.as_str(), "Routing message");

        match kind {
            MessageType::AgentTask => self.agent_task(decode(payload)?).await,
            MessageType::BrowserAction => self.browser_action(decode(payload)?).await,
            MessageType::ToolRequest => self.tools.call(decode::<ToolRequest>(payload)?).await,
        }
    }

    /// Decode and dispatch one line of JSON
    pub async fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => {
                let request_id = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("requestId").cloned());
                Reply::error(&DispatchError::InvalidPayload(e.to_string()), request_id)
            }
        }
    }

    /// Serve newline-delimited JSON until the reader is exhausted
    ///
    /// Blank lines are skipped. Each reply is written as one line. A line
    /// that is not UTF-8 gets an `InvalidPayload` reply; only a failing
    /// reader or writer ends the loop.
    pub async fn run_lines<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let reply = match std::str::from_utf8(&buf) {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => self.handle_line(line.trim()).await,
                Err(e) => {
                    debug!(error = %e, "Discarding line that is not UTF-8");
                    Reply::error(
                        &DispatchError::InvalidPayload(format!("line is not valid UTF-8: {e}")),
                        None,
                    )
                }
            };
            let mut out = serde_json::to_vec(&reply).map_err(std::io::Error::other)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
        info!("Input closed, dispatcher stopping");
        Ok(())
    }

    async fn agent_task(&self, request: AgentTaskRequest) -> Result<Value, DispatchError> {
        let task_type = TaskType::classify(request.task_type.as_deref());
        let name = request
            .name
            .unwrap_or_else(|| task_type.as_str().to_lowercase());

        let mut spec = TaskSpec::new(name, request.description)
            .with_capabilities(task_type.capabilities());
        spec.parent_task_id = request.parent_task_id;

        let task = self.tasks.create_and_start(spec).await?;
        Ok(json!({
            "taskId": task.id,
            "agentId": task.agent_id,
            "status": task.status,
        }))
    }

    async fn browser_action(&self, action: BrowserAction) -> Result<Value, DispatchError> {
        debug!(action = action.name(), "Forwarding browser action");
        Ok(self.browser.execute(action).await?)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, DispatchError> {
    serde_json::from_value(payload).map_err(|e| DispatchError::InvalidPayload(e.to_string()))
}
