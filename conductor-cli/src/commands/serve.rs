//! Conductor serve command
//!
//! Reads one JSON envelope per line on stdin and writes one reply per line
//! on stdout. Tool servers named in the config are supervised for the
//! lifetime of the command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use conductor_core::{
    AgentRegistry, ConductorEvent, Dispatcher, EventBus, EventKind, MemoryEventBus,
    MemoryTaskRepository, ProcessSupervisor, StaticAnalyzer, TaskManager, ToolRegistry,
    UnconfiguredBrowser,
};
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConductorConfig, ConfigLoader};

/// Broadcast capacity for live subscribers
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Extra config file layered over user and project config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Do not start servers flagged `autostart`
    #[arg(long)]
    pub no_autostart: bool,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    serve(&config, !args.no_autostart).await
}

async fn serve(config: &ConductorConfig, autostart: bool) -> Result<()> {
    let event_bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::with_history(
        EVENT_CHANNEL_CAPACITY,
        config.events.history,
    ));

    let agents = Arc::new(AgentRegistry::new(event_bus.clone()));
    for agent in config.agents() {
        agents.register(agent).await?;
    }

    let supervisor = ProcessSupervisor::new(
        config.server_configs(),
        config.supervisor_config(),
        event_bus.clone(),
    );
    let tasks = Arc::new(TaskManager::new(
        Arc::new(MemoryTaskRepository::new()),
        agents,
        Arc::new(StaticAnalyzer::default()),
        event_bus.clone(),
    ));

    let exits = supervisor.subscribe_exits().await;
    let background = [
        tasks.clone().watch_server_exits(exits),
        log_server_output(event_bus.as_ref()),
    ];

    if autostart {
        for name in config.autostart_servers() {
            match supervisor.start(&name).await {
                Ok(()) => info!(server = %name, "Autostarted tool server"),
                Err(e) => warn!(server = %name, error = %e, "Failed to autostart tool server"),
            }
        }
    }

    let dispatcher = Dispatcher::new(
        tasks,
        Arc::new(UnconfiguredBrowser),
        Arc::new(ToolRegistry::with_builtins()),
    );

    info!("Serving requests on stdin");
    let outcome = tokio::select! {
        result = dispatcher.run_lines(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            result.map_err(anyhow::Error::from)
        }
        result = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            result.map_err(anyhow::Error::from)
        }
    };

    for handle in background {
        handle.abort();
    }
    supervisor.stop_all().await?;
    info!("Shutdown complete");

    outcome
}

/// Log every line a tool server prints
fn log_server_output(event_bus: &dyn EventBus) -> JoinHandle<()> {
    let mut events = event_bus.subscribe_kind(EventKind::Server);
    tokio::spawn(async move {
        while let Some((_, event)) = events.recv().await {
            if let ConductorEvent::ServerOutput { name, stream, line } = event {
                info!(server = %name, %stream, "{}", line);
            }
        }
    })
}
