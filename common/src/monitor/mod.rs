// Monitor module: periodic feed checks for active users

pub mod engine;
pub mod handle;

pub use engine::{FeedHealth, MonitorConfig, MonitorEngine, MonitorPhase, MonitorStatus, TickReport};
pub use handle::{MonitorHandle, StartOutcome, StopOutcome};
