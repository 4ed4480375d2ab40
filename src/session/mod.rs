//! Playback session lifecycle

pub mod heartbeat;
pub mod orchestrator;
pub mod state;
pub mod stats;

pub use heartbeat::HeartbeatClock;
pub use orchestrator::{FailureReport, SessionOrchestrator};
pub use state::{SessionState, StateCell};
pub use stats::{SessionStats, StatsSnapshot};
