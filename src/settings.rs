// Timer settings - load/save musical timer configuration
// RON or JSON files, chosen by extension

use crate::error::{TimingError, TimingResult};
use crate::scheduler::{DEFAULT_SYNC_THRESHOLD_MS, RESUME_CORRECTION_MS};
use crate::sequencer::timeline::{DEFAULT_TEMPO, ResolutionFactor, Tempo, TimeSignature};
use crate::sequencer::MusicalTimer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings error types
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("RON serialization error: {0}")]
    RonSerialize(#[from] ron::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Timing(#[from] TimingError),

    #[error("Unsupported settings format: {0} (expected .ron or .json)")]
    UnsupportedFormat(String),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingsFormat {
    Ron,
    Json,
}

impl SettingsFormat {
    fn from_path(path: &Path) -> SettingsResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("ron") => Ok(Self::Ron),
            Some(ext) if ext.eq_ignore_ascii_case("json") => Ok(Self::Json),
            _ => Err(SettingsError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Musical timer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Tempo in BPM (1-200)
    pub tempo: u32,
    /// Time signature, written as "N/D"
    pub signature: TimeSignature,
    /// Beat resolution factor (0-4)
    pub resolution_factor: u8,
    /// Slack (ms) before a late tick is reported out of sync
    pub sync_threshold_ms: u64,
    /// Nudge (ms) applied when resuming after a pause
    pub resume_correction_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tempo: DEFAULT_TEMPO,
            signature: TimeSignature::default(),
            resolution_factor: ResolutionFactor::default().value(),
            sync_threshold_ms: DEFAULT_SYNC_THRESHOLD_MS,
            resume_correction_ms: RESUME_CORRECTION_MS,
        }
    }
}

impl TimerSettings {
    pub fn from_ron_str(data: &str) -> SettingsResult<Self> {
        let settings: Self = ron::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_str(data: &str) -> SettingsResult<Self> {
        let settings: Self = serde_json::from_str(data)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_ron_string(&self) -> SettingsResult<String> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    pub fn to_json_string(&self) -> SettingsResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load settings from a `.ron` or `.json` file
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let format = SettingsFormat::from_path(path)?;
        let data = fs::read_to_string(path)?;

        let settings = match format {
            SettingsFormat::Ron => Self::from_ron_str(&data)?,
            SettingsFormat::Json => Self::from_json_str(&data)?,
        };
        log::debug!("Loaded timer settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a `.ron` or `.json` file, creating parent directories
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        let data = match SettingsFormat::from_path(path)? {
            SettingsFormat::Ron => self.to_ron_string()?,
            SettingsFormat::Json => self.to_json_string()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// Load from the default location, falling back to defaults when the file is missing
    pub fn load_or_default() -> SettingsResult<Self> {
        match default_settings_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Check value ranges (the signature is checked when parsed)
    pub fn validate(&self) -> TimingResult<()> {
        Tempo::new(self.tempo)?;
        ResolutionFactor::new(self.resolution_factor)?;
        Ok(())
    }

    /// Push these settings into a running or stopped timer
    pub fn apply(&self, timer: &MusicalTimer) -> TimingResult<()> {
        self.validate()?;
        timer
            .set_tempo(self.tempo)?
            .set_signature(self.signature)?
            .set_resolution_factor(self.resolution_factor)?;
        timer
            .scheduler()
            .set_sync_threshold(self.sync_threshold_ms)?
            .set_resume_correction(self.resume_correction_ms)?;
        Ok(())
    }
}

/// `<config dir>/musical_timer/settings.ron`
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("musical_timer").join("settings.ron"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::EventLoop;

    #[test]
    fn test_defaults() {
        let settings = TimerSettings::default();
        assert_eq!(settings.tempo, 60);
        assert_eq!(settings.signature, TimeSignature::FourFour);
        assert_eq!(settings.resolution_factor, 2);
        assert_eq!(settings.sync_threshold_ms, 20);
        assert_eq!(settings.resume_correction_ms, 2);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_ron_partial_uses_defaults() {
        let settings = TimerSettings::from_ron_str(r#"(tempo: 90, signature: "6/8")"#).unwrap();
        assert_eq!(settings.tempo, 90);
        assert_eq!(settings.signature, TimeSignature::SixEight);
        assert_eq!(settings.resolution_factor, 2);
    }

    #[test]
    fn test_json_round_trip() {
        let settings = TimerSettings {
            tempo: 140,
            signature: TimeSignature::TwelveEight,
            resolution_factor: 1,
            sync_threshold_ms: 5,
            resume_correction_ms: 0,
        };
        let json = settings.to_json_string().unwrap();
        assert!(json.contains("\"12/8\""));
        assert_eq!(TimerSettings::from_json_str(&json).unwrap(), settings);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = TimerSettings::from_json_str(r#"{"tempo": 300}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Timing(e) if e.is_validation()));

        let err = TimerSettings::from_json_str(r#"{"resolution_factor": 9}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Timing(_)));

        let err = TimerSettings::from_json_str(r#"{"signature": "5/4"}"#).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = TimerSettings::load(Path::new("settings.toml")).unwrap_err();
        assert!(matches!(err, SettingsError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_apply_to_timer() {
        let event_loop = EventLoop::manual();
        let settings = TimerSettings {
            tempo: 120,
            signature: TimeSignature::ThreeFour,
            resolution_factor: 3,
            sync_threshold_ms: 7,
            resume_correction_ms: 1,
        };

        let timer = MusicalTimer::from_settings(event_loop.service(), &settings, |_| {}).unwrap();
        assert_eq!(timer.tempo(), 120);
        assert_eq!(timer.signature(), TimeSignature::ThreeFour);
        assert_eq!(timer.beats_per_bar(), 3);
        assert_eq!(timer.beat_subdivision(), 8);
        assert_eq!(timer.tick_interval(), 62);
        assert_eq!(timer.scheduler().sync_threshold(), 7);
        assert_eq!(timer.scheduler().resume_correction(), 1);
    }

    #[test]
    fn test_default_path_location() {
        if let Some(path) = default_settings_path() {
            assert!(path.ends_with("musical_timer/settings.ron"));
        }
    }
}
