use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::CLOCK_2014_MS;

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Guards against a pre-2014 (absent) real-time clock: the spec's open
/// procedure resets `creationTime` to `now - default_retention_time` when
/// the clock looks unset, and clamps to `now` if it somehow reads ahead.
pub fn sanitize_creation_time(candidate: u64, now: u64, default_retention_time: u64) -> u64 {
    if candidate < CLOCK_2014_MS {
        now.saturating_sub(default_retention_time)
    } else if now < candidate {
        now
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_2014_clock_is_replaced() {
        let now = CLOCK_2014_MS + 1_000_000;
        let sanitized = sanitize_creation_time(0, now, 45_000);
        assert_eq!(sanitized, now - 45_000);
    }

    #[test]
    fn future_creation_time_is_clamped_to_now() {
        let now = CLOCK_2014_MS + 1_000;
        let sanitized = sanitize_creation_time(now + 10_000, now, 45_000);
        assert_eq!(sanitized, now);
    }

    #[test]
    fn plausible_creation_time_passes_through() {
        let now = CLOCK_2014_MS + 10_000;
        let candidate = CLOCK_2014_MS + 5_000;
        assert_eq!(sanitize_creation_time(candidate, now, 45_000), candidate);
    }
}
