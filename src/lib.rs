// Musical Timer - Library exports for tests, benchmarks and the demo binary

pub mod clock;
pub mod error;
pub mod scheduler;
pub mod sequencer;
pub mod settings;

// Re-export commonly used types for convenience
pub use clock::{ClockMode, EventLoop, TimeSource, TimerId, TimerService, format_timestamp};
pub use error::{TimingError, TimingResult};
pub use scheduler::{CyclicScheduler, Repeat, SchedulerStatus};
pub use sequencer::{MusicalPosition, MusicalTimer, TimeSignature};
pub use settings::{SettingsError, TimerSettings};
