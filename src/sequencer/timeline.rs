// Timeline - Musical time representation
// Tempo, time signature, beat resolution and the position counters driven by clock ticks

use crate::error::{TimingError, TimingResult};
use std::fmt;
use std::str::FromStr;

/// Slowest supported tempo (BPM)
pub const TEMPO_MIN: u32 = 1;
/// Fastest supported tempo (BPM)
pub const TEMPO_MAX: u32 = 200;
/// Tempo used when none is given
pub const DEFAULT_TEMPO: u32 = 60;

const MS_PER_MINUTE: u64 = 60_000;

/// Highest resolution factor
pub const RESOLUTION_FACTOR_MAX: u8 = 4;

/// Sub-beats per beat, indexed by [subdivision mode][resolution factor]
const BEAT_SUBDIVISION: [[u32; 5]; 2] = [
    [1, 2, 4, 8, 16],  // binary
    [1, 3, 6, 12, 24], // ternary
];

/// How a beat is split into sub-beats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubdivisionMode {
    /// Simple meters (x/4): beats split in twos
    Binary,
    /// Compound meters (x/8): beats split in threes
    Ternary,
}

impl SubdivisionMode {
    fn table_index(&self) -> usize {
        match self {
            SubdivisionMode::Binary => 0,
            SubdivisionMode::Ternary => 1,
        }
    }
}

/// Supported time signatures
/// Example: "6/8" = TimeSignature::SixEight (2 dotted-quarter beats per bar)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimeSignature {
    TwoFour,
    ThreeFour,
    #[default]
    FourFour,
    SixEight,
    NineEight,
    TwelveEight,
}

impl TimeSignature {
    /// Every supported signature, binary first
    pub const ALL: [TimeSignature; 6] = [
        TimeSignature::TwoFour,
        TimeSignature::ThreeFour,
        TimeSignature::FourFour,
        TimeSignature::SixEight,
        TimeSignature::NineEight,
        TimeSignature::TwelveEight,
    ];

    pub fn numerator(&self) -> u32 {
        match self {
            TimeSignature::TwoFour => 2,
            TimeSignature::ThreeFour => 3,
            TimeSignature::FourFour => 4,
            TimeSignature::SixEight => 6,
            TimeSignature::NineEight => 9,
            TimeSignature::TwelveEight => 12,
        }
    }

    pub fn denominator(&self) -> u32 {
        match self {
            TimeSignature::TwoFour | TimeSignature::ThreeFour | TimeSignature::FourFour => 4,
            _ => 8,
        }
    }

    /// Denominator 4 => binary, 8 => ternary
    pub fn subdivision_mode(&self) -> SubdivisionMode {
        if self.denominator() == 4 {
            SubdivisionMode::Binary
        } else {
            SubdivisionMode::Ternary
        }
    }

    /// Number of beats per bar
    /// Ternary signatures group their eighths in threes: 6/8 has 2 beats
    pub fn beats_per_bar(&self) -> u32 {
        match self.subdivision_mode() {
            SubdivisionMode::Binary => self.numerator(),
            SubdivisionMode::Ternary => self.numerator() / 3,
        }
    }

    fn allowed_list() -> String {
        Self::ALL
            .iter()
            .map(|ts| ts.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator(), self.denominator())
    }
}

impl FromStr for TimeSignature {
    type Err = TimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|ts| ts.to_string() == wanted)
            .ok_or_else(|| {
                TimingError::validation(format!(
                    "Invalid time signature \"{}\". Allowed signatures are: {}",
                    s,
                    Self::allowed_list()
                ))
            })
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = TimingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(ts: TimeSignature) -> Self {
        ts.to_string()
    }
}

/// Tempo in BPM (Beats Per Minute)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tempo {
    bpm: u32,
}

impl Tempo {
    /// Creates a new tempo
    /// BPM must be in range [1, 200]
    pub fn new(bpm: u32) -> TimingResult<Self> {
        if !(TEMPO_MIN..=TEMPO_MAX).contains(&bpm) {
            return Err(TimingError::validation(format!(
                "Tempo must be between {} and {} BPM (got {})",
                TEMPO_MIN, TEMPO_MAX, bpm
            )));
        }
        Ok(Self { bpm })
    }

    /// Get BPM value
    pub fn bpm(&self) -> u32 {
        self.bpm
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self { bpm: DEFAULT_TEMPO }
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM", self.bpm)
    }
}

/// Depth of beat subdivision (0..=4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolutionFactor(u8);

impl ResolutionFactor {
    pub fn new(factor: u8) -> TimingResult<Self> {
        if factor > RESOLUTION_FACTOR_MAX {
            return Err(TimingError::validation(format!(
                "Resolution factor must be an integer (0-{}), got {}",
                RESOLUTION_FACTOR_MAX, factor
            )));
        }
        Ok(Self(factor))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Sub-beats per beat for this factor under the given subdivision
    pub fn sub_beats_per_beat(&self, mode: SubdivisionMode) -> u32 {
        BEAT_SUBDIVISION[mode.table_index()][self.0 as usize]
    }
}

impl Default for ResolutionFactor {
    fn default() -> Self {
        Self(2)
    }
}

/// Milliseconds between ticks, truncated toward zero:
/// floor(60000 / tempo / sub_beats_per_beat)
pub fn tick_interval_ms(
    tempo: Tempo,
    signature: TimeSignature,
    resolution: ResolutionFactor,
) -> u64 {
    let sub_beats = resolution.sub_beats_per_beat(signature.subdivision_mode()) as u64;
    MS_PER_MINUTE / tempo.bpm() as u64 / sub_beats
}

/// Musical position counters (all 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MusicalPosition {
    pub tick: u64,
    pub sub_beat: u32,
    pub beat: u32,
    pub bar: u64,
}

impl MusicalPosition {
    /// First position: tick 1, bar 1, beat 1, sub-beat 1
    pub fn start() -> Self {
        Self {
            tick: 1,
            sub_beat: 1,
            beat: 1,
            bar: 1,
        }
    }

    /// Move one tick forward, rolling sub-beats into beats and beats into bars
    pub fn advance(&mut self, sub_beats_per_beat: u32, beats_per_bar: u32) {
        self.tick += 1;
        self.sub_beat += 1;

        if self.sub_beat > sub_beats_per_beat {
            self.sub_beat = 1;
            self.beat += 1;

            if self.beat > beats_per_bar {
                self.beat = 1;
                self.bar += 1;
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::start();
    }
}

impl Default for MusicalPosition {
    fn default() -> Self {
        Self::start()
    }
}

impl fmt::Display for MusicalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:02}", self.bar, self.beat, self.sub_beat)
    }
}
