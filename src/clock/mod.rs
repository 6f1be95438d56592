// Clock - time source and timer primitives
// The scheduler only talks to these traits; EventLoop is the in-crate implementation

pub mod event_loop;
pub mod timestamp;

pub use event_loop::{ClockMode, EventLoop};
pub use timestamp::format_timestamp;

use std::fmt;
use std::rc::Rc;

/// Work executed when a timer fires
pub type TimerTask = Rc<dyn Fn()>;

/// Opaque handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Monotonic elapsed-time source, in milliseconds
pub trait TimeSource {
    fn now(&self) -> u64;
}

/// Single-shot and periodic callback primitives
///
/// Implementations must never run a task whose timer was cleared, even when
/// `clear` is called from inside another task.
pub trait TimerService: TimeSource {
    /// Run `task` every `period_ms`, first after one full period
    fn set_interval(&self, period_ms: u64, task: TimerTask) -> TimerId;

    /// Run `task` once after `delay_ms` (zero means "as soon as possible")
    fn set_timeout(&self, delay_ms: u64, task: TimerTask) -> TimerId;

    /// Cancel a timer. Unknown or already fired ids are ignored.
    fn clear(&self, id: TimerId);
}
