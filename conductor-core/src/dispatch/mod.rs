//! Inbound message routing
//!
//! The [`Dispatcher`] is the single entry point for work requests. It maps
//! `AGENT_TASK`, `BROWSER_ACTION` and `MCP_REQUEST` envelopes onto the
//! task manager, the browser automation seam and the tool-method table.

pub mod browser;
pub mod classify;
pub mod dispatcher;
pub mod envelope;
pub mod tools;

pub use browser::{BrowserAction, BrowserAutomation, UnconfiguredBrowser};
pub use classify::TaskType;
pub use dispatcher::Dispatcher;
pub use envelope::{Envelope, MessageType, Reply};
pub use tools::{ToolMethod, ToolRegistry, ToolRequest};
