//! Agent registry for conductor
//!
//! Agents are capability-tagged workers. The registry owns them, picks
//! idle agents by capability containment, and moves them between
//! `Idle`, `Busy` and `Paused` on behalf of the task manager.

pub mod registry;
pub mod types;

pub use registry::AgentRegistry;
pub use types::{
    Agent, AgentId, AgentMemory, AgentStatus, CapabilitySet, SHORT_TERM_CAPACITY, capability_set,
};
