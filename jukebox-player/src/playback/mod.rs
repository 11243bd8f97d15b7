//! Playback cycle: dequeue, stage, gate, play

pub mod orchestrator;
pub mod start_gate;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use start_gate::GateConfig;
