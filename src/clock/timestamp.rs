// Timestamp formatting for elapsed clock time

use chrono::{Duration, NaiveTime};

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

/// Below this many milliseconds the timestamp is shown as zero
const MIN_FORMATTED_MS: u64 = 3;

/// Format elapsed milliseconds as `HH:MM:SS.CC` (hours wrap every 24h)
pub fn format_timestamp(duration_ms: u64) -> String {
    if duration_ms < MIN_FORMATTED_MS {
        return "00:00:00.00".to_string();
    }

    let in_day = duration_ms % MS_PER_DAY;
    let time = NaiveTime::MIN + Duration::seconds((in_day / 1000) as i64);
    format!("{}.{:02}", time.format("%H:%M:%S"), (in_day % 1000) / 10)
}
