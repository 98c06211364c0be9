//! Managed server configuration types

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Marker a server prints on stdout once it accepts requests
pub const DEFAULT_READY_MARKER: &str = "Server ready";

/// How to launch one named server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Executable to run
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Added on top of the supervisor's own environment
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Restart with backoff after the server crashes
    #[serde(default)]
    pub restart: bool,
}

impl ServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }
}

/// Settings shared by every managed server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_ready_marker")]
    pub ready_marker: String,

    #[serde(default = "default_startup_timeout", with = "secs")]
    pub startup_timeout: Duration,

    #[serde(default = "default_stop_timeout", with = "secs")]
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ready_marker: default_ready_marker(),
            startup_timeout: default_startup_timeout(),
            stop_timeout: default_stop_timeout(),
        }
    }
}

fn default_ready_marker() -> String {
    DEFAULT_READY_MARKER.to_string()
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Durations as whole seconds
mod secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
