// duration.rs — Parsing of human-written durations in configuration.
//
// Accepted forms:
//   - a non-negative integer: seconds (`30`)
//   - a humantime string: `250ms`, `30s`, `5m`, `1h30m`, `1h 30m`
//   - a string of bare digits: seconds (`"30"`)

use std::time::Duration;

use serde_json::Value;

/// Parse a duration string such as `"1h30m"` or `"250ms"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{}': {}", s, e))
}

/// Interpret a configuration value as a duration (integer seconds or a
/// duration string).
pub fn duration_from_value(value: &Value) -> Result<Duration, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(Duration::from_secs)
            .ok_or_else(|| format!("invalid duration {}: expected non-negative whole seconds", n)),
        Value::String(s) => parse_duration(s),
        other => Err(format!("invalid duration {}: expected seconds or a string like \"30s\"", other)),
    }
}
