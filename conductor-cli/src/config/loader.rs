use super::types::{
    ConductorConfig, EventsSection, RawConductorConfig, RawEventsSection, RawSupervisorSection,
    SupervisorSection,
};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user, then project, then an explicit file)
    pub fn load(explicit: Option<&Path>) -> Result<ConductorConfig> {
        let mut raw = RawConductorConfig::default();

        // Layer 1: User config
        if let Some(user_path) = Self::user_config_path()
            && user_path.exists()
        {
            raw = Self::merge_raw(raw, Self::read_raw(&user_path)?);
        }

        // Layer 2: Project config
        let project_path = Self::project_config_path();
        if project_path.exists() {
            raw = Self::merge_raw(raw, Self::read_raw(&project_path)?);
        }

        // Layer 3: --config, which must exist
        if let Some(path) = explicit {
            raw = Self::merge_raw(raw, Self::read_raw(path)?);
        }

        let config = Self::finalize(raw);
        Self::validate(&config)?;
        Ok(config)
    }

    /// Get user config path (platform-specific)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("conductor").join("config.toml"))
    }

    /// Get project config path
    /// Can be overridden with CONDUCTOR_PROJECT_CONFIG_DIR env var
    pub fn project_config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("CONDUCTOR_PROJECT_CONFIG_DIR") {
            PathBuf::from(dir).join("config.toml")
        } else {
            PathBuf::from(".conductor/config.toml")
        }
    }

    fn read_raw(path: &Path) -> Result<RawConductorConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    ///
    /// Servers are overlaid by name and agents by id.
    fn merge_raw(base: RawConductorConfig, overlay: RawConductorConfig) -> RawConductorConfig {
        let mut servers = base.servers;
        servers.extend(overlay.servers);

        let mut agents = base.agents;
        for agent in overlay.agents {
            match agents.iter_mut().find(|existing| existing.id == agent.id) {
                Some(existing) => *existing = agent,
                None => agents.push(agent),
            }
        }

        RawConductorConfig {
            supervisor: RawSupervisorSection {
                ready_marker: overlay
                    .supervisor
                    .ready_marker
                    .or(base.supervisor.ready_marker),
                startup_timeout_secs: overlay
                    .supervisor
                    .startup_timeout_secs
                    .or(base.supervisor.startup_timeout_secs),
                stop_timeout_secs: overlay
                    .supervisor
                    .stop_timeout_secs
                    .or(base.supervisor.stop_timeout_secs),
            },
            servers,
            agents,
            events: RawEventsSection {
                history: overlay.events.history.or(base.events.history),
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawConductorConfig) -> ConductorConfig {
        let supervisor = SupervisorSection::default();
        ConductorConfig {
            supervisor: SupervisorSection {
                ready_marker: raw.supervisor.ready_marker.unwrap_or(supervisor.ready_marker),
                startup_timeout_secs: raw
                    .supervisor
                    .startup_timeout_secs
                    .unwrap_or(supervisor.startup_timeout_secs),
                stop_timeout_secs: raw
                    .supervisor
                    .stop_timeout_secs
                    .unwrap_or(supervisor.stop_timeout_secs),
            },
            servers: raw.servers,
            agents: raw.agents,
            events: EventsSection {
                history: raw
                    .events
                    .history
                    .unwrap_or(EventsSection::default().history),
            },
        }
    }

    fn validate(config: &ConductorConfig) -> Result<()> {
        if config.supervisor.ready_marker.is_empty() {
            bail!("supervisor.ready_marker must not be empty");
        }
        for agent in &config.agents {
            if let Some(server) = &agent.server
                && !config.servers.contains_key(server)
            {
                bail!(
                    "agent '{}' depends on server '{}', which is not configured",
                    agent.id,
                    server
                );
            }
        }
        Ok(())
    }

    /// Load config from a specific path (for testing)
    #[cfg(test)]
    pub fn load_from_path(path: &Path) -> Result<ConductorConfig> {
        if path.exists() {
            let config = Self::finalize(Self::read_raw(path)?);
            Self::validate(&config)?;
            Ok(config)
        } else {
            Ok(ConductorConfig::default())
        }
    }
}
