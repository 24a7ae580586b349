//! Schedule-expression parser (§4.1 "Schedule expression parser", §9 redesign
//! flag replacing the original's ad-hoc string-splitting with an explicit
//! grammar). Accepts:
//!
//! - `"HH:MM"` — next daily local-time occurrence.
//! - `"*/N minutes"` / `"*/N hours"` — fixed interval from now.
//! - a bare integer — seconds from now.
//!
//! Invalid expressions log a warning and fall back to one hour, so a
//! misconfigured task still eventually fires rather than never scheduling.

use chrono::{Local, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;

const FALLBACK_SECONDS: i64 = 3600;

static INTERVAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*/(\d+)\s*(minutes?|hours?)$").unwrap());
static CLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-1]?\d|2[0-3]):([0-5]\d)$").unwrap());

/// Parses `expr` and returns seconds until it next fires, relative to now.
pub fn seconds_until_next(expr: &str) -> i64 {
    let expr = expr.trim();

    if let Some(caps) = CLOCK_RE.captures(expr) {
        let hour: u32 = caps[1].parse().unwrap();
        let minute: u32 = caps[2].parse().unwrap();
        return seconds_until_daily(hour, minute);
    }

    if let Some(caps) = INTERVAL_RE.captures(expr) {
        let n: i64 = caps[1].parse().unwrap_or(0);
        if n > 0 {
            let unit = &caps[2];
            return if unit.starts_with("hour") { n * 3600 } else { n * 60 };
        }
        tracing::warn!(expr = %expr, "zero-length interval, falling back to 1 hour");
        return FALLBACK_SECONDS;
    }

    if let Ok(secs) = expr.parse::<i64>() {
        return secs.max(0);
    }

    tracing::warn!(expr = %expr, "unparseable schedule expression, falling back to 1 hour");
    FALLBACK_SECONDS
}

fn seconds_until_daily(hour: u32, minute: u32) -> i64 {
    let now = Local::now();
    let target_today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0));

    match target_today {
        Some(t) if t > now => (t - now).num_seconds(),
        Some(t) => (t + chrono::Duration::days(1) - now).num_seconds(),
        None => FALLBACK_SECONDS,
    }
}

/// Whether `now` (local wall-clock time) falls in the night window, which may
/// wrap past midnight (§4.3 "default 01:00-06:00 local, configurable;
/// wrap-around allowed").
pub fn in_night_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_interval() {
        assert_eq!(seconds_until_next("*/15 minutes"), 900);
    }

    #[test]
    fn parses_hour_interval() {
        assert_eq!(seconds_until_next("*/2 hours"), 7200);
    }

    #[test]
    fn parses_bare_seconds() {
        assert_eq!(seconds_until_next("45"), 45);
    }

    #[test]
    fn clock_expression_is_positive_and_bounded_by_a_day() {
        let secs = seconds_until_next("08:00");
        assert!(secs > 0 && secs <= 86400);
    }

    #[test]
    fn invalid_expression_falls_back_to_one_hour() {
        assert_eq!(seconds_until_next("not a schedule"), FALLBACK_SECONDS);
    }

    #[test]
    fn zero_interval_falls_back_to_one_hour() {
        assert_eq!(seconds_until_next("*/0 minutes"), FALLBACK_SECONDS);
        assert_eq!(seconds_until_next("*/0 hours"), FALLBACK_SECONDS);
    }

    #[test]
    fn night_window_wraps_past_midnight() {
        let start = NaiveTime::from_hms_opt(1, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        assert!(in_night_window(NaiveTime::from_hms_opt(2, 0, 0).unwrap(), start, end));
        assert!(!in_night_window(NaiveTime::from_hms_opt(12, 0, 0).unwrap(), start, end));

        let wrap_start = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let wrap_end = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
        assert!(in_night_window(NaiveTime::from_hms_opt(23, 30, 0).unwrap(), wrap_start, wrap_end));
        assert!(in_night_window(NaiveTime::from_hms_opt(1, 0, 0).unwrap(), wrap_start, wrap_end));
        assert!(!in_night_window(NaiveTime::from_hms_opt(12, 0, 0).unwrap(), wrap_start, wrap_end));
    }
}
