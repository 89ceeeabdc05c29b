pub mod blueprint;
pub mod context;
pub mod engine;
pub mod listener;
pub mod merge;
pub mod scheduler;
pub mod simulation;
pub mod task;
pub mod thread;

/// Simulated time in whole units.
pub type Timestamp = u64;
