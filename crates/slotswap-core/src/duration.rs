//! Human duration strings used throughout `slotswap.toml`.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let trimmed = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());

    let parsed = if let Some(ms) = trimmed.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = trimmed.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_secs)
    };

    parsed.ok_or_else(invalid)
}
