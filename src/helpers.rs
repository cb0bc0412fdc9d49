// ============================================================================
// SHARED HELPERS
// ============================================================================
// Clock formatting, timing statistics and the request-flag parsers used by
// both the control surface and the CLI.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::Serialize;

// ----------------------------------------------------------------------------
// Clock Time
// ----------------------------------------------------------------------------

/// A duration rendered as `HH:MM:SS` (hours are not wrapped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct ClockTime(pub Duration);

impl Display for ClockTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let total = self.0.as_secs();
        write!(f, "{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
    }
}

impl From<Duration> for ClockTime {
    fn from(d: Duration) -> Self {
        ClockTime(d)
    }
}

// ----------------------------------------------------------------------------
// Timing Statistics
// ----------------------------------------------------------------------------

/// Running count, sum and extremes of a series of durations.
///
/// `min` stays `None` until the first sample so an idle series never reports
/// a zero shortest time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingStats {
    pub count: u64,
    pub total: Duration,
    pub min: Option<Duration>,
    pub max: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&mut self, sample: Duration) {
        self.count += 1;
        self.total = self.total.saturating_add(sample);
        self.min = Some(self.min.map_or(sample, |m| m.min(sample)));
        if sample > self.max {
            self.max = sample;
        }
    }

    /// Fold another series into this one.
    pub fn merge(&mut self, other: &TimingStats) {
        self.count += other.count;
        self.total = self.total.saturating_add(other.total);
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = self.max.max(other.max);
    }

    pub fn average(&self) -> Option<Duration> {
        if self.count == 0 {
            None
        } else {
            let nanos = self.total.as_nanos() / u128::from(self.count);
            Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
        }
    }
}

// ----------------------------------------------------------------------------
// Request Parsing
// ----------------------------------------------------------------------------

/// Parse a boolean flag using the usual spellings; anything else is `None`.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Flag value with a fallback for missing or unparseable input.
pub fn flag_or(raw: Option<&str>, default: bool) -> bool {
    raw.and_then(parse_flag).unwrap_or(default)
}

/// Requested window length. Missing, zero or unparseable input falls back to
/// `default`.
pub fn parse_runtime(raw: Option<&str>, default: Duration) -> Duration {
    raw.and_then(|r| humantime::parse_duration(r.trim()).ok())
        .filter(|d| !d.is_zero())
        .unwrap_or(default)
}

/// Integer percentage, zero when the whole is zero.
#[inline]
pub fn percent(part: u64, whole: u64) -> u64 {
    if whole == 0 {
        0
    } else {
        let pct = u128::from(part) * 100 / u128::from(whole);
        u64::try_from(pct).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, "00:00:00")]
    #[case(59, "00:00:59")]
    #[case(61, "00:01:01")]
    #[case(3_600 * 25 + 7, "25:00:07")]
    fn test_clock_time(#[case] secs: u64, #[case] expected: &str) {
        assert_eq!(ClockTime(Duration::from_secs(secs)).to_string(), expected);
    }

    #[test]
    fn test_timing_stats_record_and_merge() {
        let mut a = TimingStats::new();
        assert_eq!(a.average(), None);
        a.record(Duration::from_millis(10));
        a.record(Duration::from_millis(30));
        assert_eq!(a.min, Some(Duration::from_millis(10)));
        assert_eq!(a.max, Duration::from_millis(30));
        assert_eq!(a.average(), Some(Duration::from_millis(20)));

        let mut b = TimingStats::new();
        b.record(Duration::from_millis(5));
        a.merge(&b);
        assert_eq!(a.count, 3);
        assert_eq!(a.min, Some(Duration::from_millis(5)));

        let mut empty = TimingStats::new();
        empty.merge(&TimingStats::new());
        assert_eq!(empty.min, None);
    }

    #[rstest]
    #[case("1", Some(true))]
    #[case("T", Some(true))]
    #[case("True", Some(true))]
    #[case("f", Some(false))]
    #[case("FALSE", Some(false))]
    #[case("yes", None)]
    #[case("", None)]
    fn test_parse_flag(#[case] raw: &str, #[case] expected: Option<bool>) {
        assert_eq!(parse_flag(raw), expected);
    }

    #[test]
    fn test_parse_runtime_falls_back() {
        let default = Duration::from_secs(600);
        assert_eq!(parse_runtime(Some("20s"), default), Duration::from_secs(20));
        assert_eq!(parse_runtime(Some("1m 30s"), default), Duration::from_secs(90));
        assert_eq!(parse_runtime(Some("0s"), default), default);
        assert_eq!(parse_runtime(Some("soon"), default), default);
        assert_eq!(parse_runtime(None, default), default);
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25);
        assert_eq!(percent(3, 0), 0);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
        assert_eq!(percent(u64::MAX / 2, u64::MAX), 49);
    }

    #[test]
    fn test_average_over_large_counts() {
        let stats = TimingStats {
            count: u64::from(u32::MAX) + 10,
            total: Duration::from_secs(u64::from(u32::MAX) + 10),
            min: Some(Duration::from_secs(1)),
            max: Duration::from_secs(1),
        };
        assert_eq!(stats.average(), Some(Duration::from_secs(1)));
    }
}
