//! Event system for conductor

pub mod bus;
pub mod memory;
pub mod types;

pub use bus::{EventBus, EventSeq, TopicReceiver};
pub use memory::{DEFAULT_HISTORY, MemoryEventBus};
pub use types::{ConductorEvent, EventKind};
