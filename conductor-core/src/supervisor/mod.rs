//! Supervision of external tool-server processes

pub mod config;
pub mod manager;
pub mod restart;
pub mod state;

pub use config::{DEFAULT_READY_MARKER, ServerConfig, SupervisorConfig};
pub use manager::{ExitNotice, ProcessSupervisor};
pub use restart::RestartPolicy;
pub use state::{OutputStream, ServerState};
