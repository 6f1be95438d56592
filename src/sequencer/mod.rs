// Sequencer module
// Musical time representation and the tick-driven musical clock

pub mod timeline;
pub mod transport;

pub use timeline::{
    MusicalPosition, ResolutionFactor, SubdivisionMode, Tempo, TimeSignature, tick_interval_ms,
};
pub use transport::{MusicalTimer, TickCallback};
