pub mod capabilities;
pub mod sample;
pub mod watch;

use std::time::Duration;

/// Parse a human duration: `"250ms"`, `"30s"`, `"5m"`, `"1h"`. A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    let (numeric, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1000)
    };

    let value: u64 = numeric
        .trim()
        .parse()
        .map_err(|_| format!("Invalid duration: {s}"))?;
    if value == 0 {
        return Err(format!("Duration must be positive: {s}"));
    }

    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration too large: {s}"))
}

/// Split a comma-separated flag value, dropping empty entries.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Render an exported value; missing history prints as `null`.
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "null".to_string(),
    }
}
