//! Age gate: time since the change's last activity.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Time elapsed from `then` to `now`, clamped at zero for clock skew.
pub fn elapsed(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// Rejection reason if `elapsed` falls outside `[min, max]`.
pub fn check(elapsed: Duration, min: Option<Duration>, max: Option<Duration>) -> Option<String> {
    if let Some(min) = min {
        if elapsed < min {
            return Some(format!(
                "PR updated too recently (last push: {} ago, required: {})",
                format_duration(round_to(elapsed, 60)),
                format_duration(min)
            ));
        }
    }
    if let Some(max) = max {
        if elapsed > max {
            return Some(format!(
                "PR has been stale too long (last push: {} ago, max: {})",
                format_duration(round_to(elapsed, 3600)),
                format_duration(max)
            ));
        }
    }
    None
}

fn round_to(d: Duration, unit_secs: u64) -> Duration {
    let secs = d.as_secs();
    Duration::from_secs((secs + unit_secs / 2) / unit_secs * unit_secs)
}

/// Compact human form: `45s`, `12m`, `3h 5m`, `2d 4h`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        return format!("{secs}s");
    }
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3600;
    let minutes = secs % 3600 / 60;
    match (days, hours, minutes) {
        (0, 0, m) => format!("{m}m"),
        (0, h, 0) => format!("{h}h"),
        (0, h, m) => format!("{h}h {m}m"),
        (d, 0, _) => format!("{d}d"),
        (d, h, _) => format!("{d}d {h}h"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(HOUR * 2), "2h");
        assert_eq!(format_duration(Duration::from_secs(3600 + 5 * 60)), "1h 5m");
        assert_eq!(format_duration(HOUR * 24 * 3), "3d");
        assert_eq!(format_duration(HOUR * 50), "2d 2h");
    }

    #[test]
    fn test_window() {
        assert_eq!(check(HOUR, None, None), None);
        assert_eq!(
            check(Duration::from_secs(29 * 60 + 50), Some(HOUR), None).as_deref(),
            Some("PR updated too recently (last push: 30m ago, required: 1h)")
        );
        assert_eq!(
            check(HOUR * 30, None, Some(HOUR * 24)).as_deref(),
            Some("PR has been stale too long (last push: 1d 6h ago, max: 1d)")
        );
        assert_eq!(check(HOUR * 2, Some(HOUR), Some(HOUR * 24)), None);
    }

    #[test]
    fn test_clock_skew_clamps() {
        let now = Utc::now();
        assert_eq!(elapsed(now + chrono::Duration::minutes(5), now), Duration::ZERO);
    }
}
