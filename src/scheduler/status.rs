// Scheduler lifecycle status

use std::fmt;

/// Lifecycle state of a `CyclicScheduler`, with stable numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum SchedulerStatus {
    Destroyed = -1,
    #[default]
    Stopped = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
}

impl SchedulerStatus {
    /// Numeric status code
    pub fn code(&self) -> i8 {
        *self as i8
    }

    /// Lowercase label ("running", "paused", ...)
    pub fn label(&self) -> &'static str {
        match self {
            SchedulerStatus::Destroyed => "destroyed",
            SchedulerStatus::Stopped => "stopped",
            SchedulerStatus::Running => "running",
            SchedulerStatus::Paused => "paused",
            SchedulerStatus::Completed => "completed",
        }
    }

    /// Running or Paused, i.e. inside a run that has not finished
    pub fn is_active(&self) -> bool {
        matches!(self, SchedulerStatus::Running | SchedulerStatus::Paused)
    }
}

impl TryFrom<i8> for SchedulerStatus {
    type Error = i8;

    fn try_from(code: i8) -> Result<Self, Self::Error> {
        match code {
            -1 => Ok(SchedulerStatus::Destroyed),
            0 => Ok(SchedulerStatus::Stopped),
            1 => Ok(SchedulerStatus::Running),
            2 => Ok(SchedulerStatus::Paused),
            3 => Ok(SchedulerStatus::Completed),
            other => Err(other),
        }
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
