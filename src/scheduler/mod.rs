// Scheduler module
// Drift-correcting cyclic scheduler and its lifecycle status

pub mod cyclic;
pub mod status;

pub use cyclic::{
    Action, Condition, CyclicScheduler, DEFAULT_SYNC_THRESHOLD_MS, RESUME_CORRECTION_MS, Repeat,
};
pub use status::SchedulerStatus;
