use crate::domain::result::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Interval used when a history query does not name one
pub const DEFAULT_INTERVAL: &str = "1h";

/// Width of an aggregation window, aligned to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowInterval {
    millis: i64,
}

impl WindowInterval {
    pub fn from_millis(millis: i64) -> DomainResult<Self> {
        if millis <= 0 {
            return Err(DomainError::InvalidInterval(format!("{millis}ms")));
        }
        Ok(Self { millis })
    }

    pub fn as_millis(&self) -> i64 {
        self.millis
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.millis as u64)
    }

    /// Start of the window containing `at`
    pub fn window_start(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp_millis().div_euclid(self.millis) * self.millis
    }
}

impl fmt::Display for WindowInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.millis)
    }
}

fn unit_millis(unit: &str) -> Option<i64> {
    match unit {
        "ms" => Some(1),
        "s" => Some(1_000),
        "m" => Some(60_000),
        "h" => Some(3_600_000),
        "d" => Some(86_400_000),
        "w" => Some(604_800_000),
        _ => None,
    }
}

/// Parse a duration expression such as `5m`, `1h` or `1h30m`.
pub fn parse_interval(raw: &str) -> DomainResult<WindowInterval> {
    let invalid = || DomainError::InvalidInterval(raw.to_string());
    let input = raw.trim();
    if input.is_empty() {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        if digits_end == 0 {
            return Err(invalid());
        }
        let amount: i64 = rest[..digits_end].parse().map_err(|_| invalid())?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let factor = unit_millis(&rest[..unit_end]).ok_or_else(invalid)?;
        rest = &rest[unit_end..];

        total = amount
            .checked_mul(factor)
            .and_then(|part| total.checked_add(part))
            .ok_or_else(invalid)?;
    }

    WindowInterval::from_millis(total).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_simple_units() {
        assert_eq!(parse_interval("250ms").unwrap().as_millis(), 250);
        assert_eq!(parse_interval("30s").unwrap().as_millis(), 30_000);
        assert_eq!(parse_interval("5m").unwrap().as_millis(), 300_000);
        assert_eq!(parse_interval("1h").unwrap().as_millis(), 3_600_000);
        assert_eq!(parse_interval("2d").unwrap().as_millis(), 172_800_000);
        assert_eq!(parse_interval("1w").unwrap().as_millis(), 604_800_000);
    }

    #[test]
    fn test_compound_expression() {
        assert_eq!(parse_interval("1h30m").unwrap().as_millis(), 5_400_000);
        assert_eq!(parse_interval("1m500ms").unwrap().as_millis(), 60_500);
    }

    #[test]
    fn test_rejects_bad_expressions() {
        for raw in ["", "h", "10", "5x", "0s", "1h-5m", "m5", "99999999999999999999w"] {
            assert!(
                matches!(parse_interval(raw), Err(DomainError::InvalidInterval(_))),
                "expected {raw:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_window_start_is_epoch_aligned() {
        let interval = parse_interval("1h").unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 10, 42, 7).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(interval.window_start(at), expected.timestamp_millis());
    }
}
