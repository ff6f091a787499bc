//! Small pure helpers for durations, snippets, and sortable timestamps.

use chrono::{DateTime, Utc};

/// Human-readable elapsed time between two instants: `42s`, `3m 12s`, `1h 4m`.
pub fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let secs = (end - start).num_seconds().max(0);
    if secs < 60 {
        return format!("{secs}s");
    }
    let mins = secs / 60;
    if mins < 60 {
        return format!("{}m {}s", mins, secs % 60);
    }
    format!("{}h {}m", mins / 60, mins % 60)
}

/// Truncate to at most `max` characters, appending `...` when shortened.
/// Char-based so multibyte input never splits mid-codepoint.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    format!("{}...", text.chars().take(max).collect::<String>())
}

/// Current UTC time as a filesystem-safe, lexically sortable stamp.
pub fn sortable_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}
