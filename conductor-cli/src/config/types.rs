use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use conductor_core::events::DEFAULT_HISTORY;
use conductor_core::{Agent, ServerConfig, SupervisorConfig, capability_set};
use serde::{Deserialize, Serialize};

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConductorConfig {
    #[serde(default)]
    pub supervisor: RawSupervisorSection,

    #[serde(default)]
    pub servers: BTreeMap<String, ServerSection>,

    #[serde(default)]
    pub agents: Vec<AgentSection>,

    #[serde(default)]
    pub events: RawEventsSection,
}

/// Supervisor settings as stored in TOML
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSupervisorSection {
    pub ready_marker: Option<String>,
    pub startup_timeout_secs: Option<u64>,
    pub stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawEventsSection {
    pub history: Option<usize>,
}

/// One `[servers.<name>]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub restart: bool,

    /// Start together with `conductor serve`
    #[serde(default)]
    pub autostart: bool,
}

/// One `[[agents]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSection {
    pub id: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Managed tool server this agent depends on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, Serialize, Default)]
pub struct ConductorConfig {
    pub supervisor: SupervisorSection,
    pub servers: BTreeMap<String, ServerSection>,
    pub agents: Vec<AgentSection>,
    pub events: EventsSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorSection {
    pub ready_marker: String,
    pub startup_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        let defaults = SupervisorConfig::default();
        Self {
            ready_marker: defaults.ready_marker,
            startup_timeout_secs: defaults.startup_timeout.as_secs(),
            stop_timeout_secs: defaults.stop_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventsSection {
    pub history: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            history: DEFAULT_HISTORY,
        }
    }
}

impl ConductorConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            ready_marker: self.supervisor.ready_marker.clone(),
            startup_timeout: Duration::from_secs(self.supervisor.startup_timeout_secs),
            stop_timeout: Duration::from_secs(self.supervisor.stop_timeout_secs),
        }
    }

    pub fn server_configs(&self) -> HashMap<String, ServerConfig> {
        self.servers
            .iter()
            .map(|(name, section)| {
                let config = ServerConfig {
                    command: section.command.clone(),
                    args: section.args.clone(),
                    env: section.env.clone(),
                    restart: section.restart,
                };
                (name.clone(), config)
            })
            .collect()
    }

    /// Names of servers flagged `autostart`, in name order
    pub fn autostart_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, section)| section.autostart)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents
            .iter()
            .map(|section| {
                let agent = Agent::new(
                    section.id.clone(),
                    capability_set(section.capabilities.iter().cloned()),
                );
                match &section.server {
                    Some(server) => agent.with_server(server.clone()),
                    None => agent,
                }
            })
            .collect()
    }
}
