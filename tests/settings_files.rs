// Integration test: timer settings on disk
//
// Save/load through RON and JSON files and build timers from them.

use musical_timer::settings::SettingsError;
use musical_timer::{EventLoop, MusicalTimer, TimeSignature, TimerSettings};
use std::fs;
use tempfile::tempdir;

fn sample_settings() -> TimerSettings {
    TimerSettings {
        tempo: 96,
        signature: TimeSignature::NineEight,
        resolution_factor: 1,
        sync_threshold_ms: 12,
        resume_correction_ms: 3,
    }
}

#[test]
fn test_save_and_load_ron() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("timer.ron");

    sample_settings().save(&path).unwrap();
    assert!(path.exists());

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("\"9/8\""));

    let loaded = TimerSettings::load(&path).unwrap();
    assert_eq!(loaded, sample_settings());
}

#[test]
fn test_save_and_load_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("timer.json");

    sample_settings().save(&path).unwrap();
    let loaded = TimerSettings::load(&path).unwrap();
    assert_eq!(loaded, sample_settings());
}

#[test]
fn test_hand_written_files() {
    let dir = tempdir().unwrap();

    let ron_path = dir.path().join("live.ron");
    fs::write(&ron_path, "(tempo: 140, resolution_factor: 3)").unwrap();
    let settings = TimerSettings::load(&ron_path).unwrap();
    assert_eq!(settings.tempo, 140);
    assert_eq!(settings.resolution_factor, 3);
    assert_eq!(settings.signature, TimeSignature::FourFour);

    let json_path = dir.path().join("live.json");
    fs::write(&json_path, r#"{ "signature": "12/8" }"#).unwrap();
    let settings = TimerSettings::load(&json_path).unwrap();
    assert_eq!(settings.signature, TimeSignature::TwelveEight);
    assert_eq!(settings.tempo, 60);
}

#[test]
fn test_load_errors() {
    let dir = tempdir().unwrap();

    let missing = dir.path().join("missing.ron");
    assert!(matches!(
        TimerSettings::load(&missing),
        Err(SettingsError::Io(_))
    ));

    let broken = dir.path().join("broken.ron");
    fs::write(&broken, "(tempo: ").unwrap();
    assert!(matches!(
        TimerSettings::load(&broken),
        Err(SettingsError::Ron(_))
    ));

    let out_of_range = dir.path().join("fast.json");
    fs::write(&out_of_range, r#"{ "tempo": 500 }"#).unwrap();
    assert!(matches!(
        TimerSettings::load(&out_of_range),
        Err(SettingsError::Timing(_))
    ));

    let yaml = dir.path().join("timer.yaml");
    fs::write(&yaml, "tempo: 90").unwrap();
    assert!(matches!(
        TimerSettings::load(&yaml),
        Err(SettingsError::UnsupportedFormat(_))
    ));
}

#[test]
fn test_timer_from_loaded_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("timer.ron");
    sample_settings().save(&path).unwrap();

    let settings = TimerSettings::load(&path).unwrap();
    let event_loop = EventLoop::manual();
    let timer = MusicalTimer::from_settings(event_loop.service(), &settings, |_| {}).unwrap();

    assert_eq!(timer.tempo(), 96);
    assert_eq!(timer.signature(), TimeSignature::NineEight);
    assert_eq!(timer.beats_per_bar(), 3);
    assert_eq!(timer.beat_subdivision(), 3);
    assert_eq!(timer.tick_interval(), 60_000 / 96 / 3);
    assert_eq!(timer.scheduler().sync_threshold(), 12);
    assert_eq!(timer.scheduler().resume_correction(), 3);
}
