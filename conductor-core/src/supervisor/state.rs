//! Managed server state types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one managed server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServerState {
    /// Not running; never started or stopped on request
    #[default]
    Stopped,
    /// Spawned, waiting for the readiness marker
    Starting,
    /// Printed the readiness marker and is still alive
    Running,
    /// Exited on its own; `code` is absent when killed by a signal
    Exited { code: Option<i32> },
}

impl ServerState {
    /// Whether the process is alive (starting or ready)
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Which output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}
