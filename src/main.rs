use clap::Parser;
use musical_timer::sequencer::timeline::{ResolutionFactor, Tempo};
use musical_timer::{EventLoop, MusicalTimer, SettingsError, TimeSignature, TimerSettings};
use std::path::PathBuf;

/// Prints the musical position of a running clock, bar by bar.
#[derive(Parser, Debug)]
#[command(name = "musical_timer")]
#[command(about = "Drift-correcting musical clock")]
struct Args {
    /// Tempo in BPM (1-200)
    #[arg(short, long, value_parser = parse_tempo)]
    tempo: Option<u32>,

    /// Time signature (2/4, 3/4, 4/4, 6/8, 9/8, 12/8)
    #[arg(short, long)]
    signature: Option<TimeSignature>,

    /// Beat resolution factor (0-4)
    #[arg(short, long, value_parser = parse_resolution)]
    resolution: Option<u8>,

    /// Number of bars to play before exiting
    #[arg(short, long, default_value = "2")]
    bars: u64,

    /// Settings file (.ron or .json), defaults to the user config directory
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn parse_tempo(s: &str) -> Result<u32, String> {
    let bpm: u32 = s.parse().map_err(|e| format!("Invalid tempo: {}", e))?;
    Tempo::new(bpm).map(|t| t.bpm()).map_err(|e| e.to_string())
}

fn parse_resolution(s: &str) -> Result<u8, String> {
    let factor: u8 = s
        .parse()
        .map_err(|e| format!("Invalid resolution factor: {}", e))?;
    ResolutionFactor::new(factor)
        .map(|r| r.value())
        .map_err(|e| e.to_string())
}

fn main() -> Result<(), SettingsError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match &args.settings {
        Some(path) => TimerSettings::load(path)?,
        None => TimerSettings::load_or_default()?,
    };
    if let Some(tempo) = args.tempo {
        settings.tempo = tempo;
    }
    if let Some(signature) = args.signature {
        settings.signature = signature;
    }
    if let Some(resolution) = args.resolution {
        settings.resolution_factor = resolution;
    }

    let event_loop = EventLoop::realtime();
    let bars = args.bars;
    let last_beat = std::cell::Cell::new(0);
    let last_bar = std::cell::Cell::new(0);

    let timer = MusicalTimer::from_settings(event_loop.service(), &settings, move |t| {
        if t.bar() > bars {
            return;
        }
        if t.bar() != last_bar.get() {
            last_bar.set(t.bar());
            println!();
            println!("Bar {}", t.bar());
        }
        if t.beat() != last_beat.get() {
            last_beat.set(t.beat());
            println!("...Beat {}", t.beat());
        }
        println!("...... SubBeat {}", t.sub_beat());
    })?;

    log::info!(
        "Playing {} bars of {} at {} BPM, {} sub-beats per beat ({} ms per tick)",
        bars,
        timer.signature(),
        timer.tempo(),
        timer.beat_subdivision(),
        timer.tick_interval()
    );

    timer.play()?;
    event_loop.run_until(|| timer.bar() > bars);

    let elapsed = timer.timestamp_formatted();
    let in_sync = timer.in_sync();
    timer.stop()?;

    log::info!("Finished after {} (in sync: {})", elapsed, in_sync);
    Ok(())
}
