//! Rate limit expressions such as `120/min` or `120/2 hours`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QuotaguardError, Result};

/// Time unit a limit expression may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Look up a unit token.
    ///
    /// Matching is case-sensitive: only the lower-case spellings are known,
    /// so `"S"` and `"MIN"` are rejected rather than guessed at.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "second" | "seconds" | "sec" | "s" => Some(TimeUnit::Second),
            "minute" | "minutes" | "min" | "m" => Some(TimeUnit::Minute),
            "hour" | "hours" | "h" => Some(TimeUnit::Hour),
            "day" | "days" | "d" => Some(TimeUnit::Day),
            _ => None,
        }
    }

    /// Length of one unit in seconds.
    pub fn seconds(&self) -> u64 {
        match self {
            TimeUnit::Second => 1,
            TimeUnit::Minute => 60,
            TimeUnit::Hour => 3600,
            TimeUnit::Day => 86400,
        }
    }
}

/// A parsed limit: at most `count` requests per `window_secs` seconds.
///
/// Counters are keyed by the original text, so `"60/min"` and `"60/1 min"`
/// are tracked independently even though they describe the same window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LimitSpec {
    count: u64,
    window_secs: u64,
    raw: String,
}

impl LimitSpec {
    /// Parse a `<count>/<unit>` or `<count>/<multiplier> <unit>` expression.
    pub fn parse(text: &str) -> Result<Self> {
        let (count, frame) = text
            .split_once('/')
            .ok_or_else(|| QuotaguardError::invalid_spec(text, "expected `<count>/<unit>`"))?;

        let count = parse_positive(text, count, "count")?;

        let (multiplier, unit) = match frame.split_once(char::is_whitespace) {
            Some((multiplier, unit)) => (parse_positive(text, multiplier, "multiplier")?, unit),
            None => (1, frame),
        };

        let unit = TimeUnit::from_token(unit)
            .ok_or_else(|| QuotaguardError::invalid_spec(text, format!("unknown time unit {unit:?}")))?;

        let window_secs = multiplier
            .checked_mul(unit.seconds())
            .ok_or_else(|| QuotaguardError::invalid_spec(text, "window is too long"))?;

        Ok(Self {
            count,
            window_secs,
            raw: text.to_string(),
        })
    }

    /// Parse a list of expressions, failing on the first invalid one.
    pub fn parse_all<S: AsRef<str>>(texts: &[S]) -> Result<Vec<Self>> {
        texts.iter().map(|text| Self::parse(text.as_ref())).collect()
    }

    /// Requests allowed per window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Window length in seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Window length as a `Duration`.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The text this limit was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Index of the fixed window containing `now`.
    pub fn frame_at(&self, now: u64) -> u64 {
        now / self.window_secs
    }

    /// Seconds from `now` until the next window starts. Always at least 1.
    pub fn wait_at(&self, now: u64) -> u64 {
        self.window_secs - now % self.window_secs
    }
}

fn parse_positive(text: &str, digits: &str, what: &str) -> Result<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(QuotaguardError::invalid_spec(
            text,
            format!("{what} must be a decimal integer"),
        ));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| QuotaguardError::invalid_spec(text, format!("{what} is too large")))?;

    if value == 0 {
        return Err(QuotaguardError::invalid_spec(
            text,
            format!("{what} must be at least 1"),
        ));
    }

    Ok(value)
}

impl FromStr for LimitSpec {
    type Err = QuotaguardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LimitSpec {
    type Error = QuotaguardError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<LimitSpec> for String {
    fn from(spec: LimitSpec) -> Self {
        spec.raw
    }
}

impl fmt::Display for LimitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_unit() {
        let spec = LimitSpec::parse("120/min").unwrap();
        assert_eq!(spec.count(), 120);
        assert_eq!(spec.window_secs(), 60);
        assert_eq!(spec.as_str(), "120/min");
    }

    #[test]
    fn test_parse_multiplier() {
        let spec = LimitSpec::parse("120/2 hours").unwrap();
        assert_eq!(spec.count(), 120);
        assert_eq!(spec.window_secs(), 7200);

        let spec = LimitSpec::parse("5000/5 min").unwrap();
        assert_eq!(spec.window_secs(), 300);
    }

    #[test]
    fn test_unit_table() {
        let cases = [
            ("day", 86400),
            ("days", 86400),
            ("d", 86400),
            ("hour", 3600),
            ("hours", 3600),
            ("h", 3600),
            ("minute", 60),
            ("minutes", 60),
            ("min", 60),
            ("m", 60),
            ("second", 1),
            ("seconds", 1),
            ("sec", 1),
            ("s", 1),
        ];

        for (unit, secs) in cases {
            let spec = LimitSpec::parse(&format!("1/{unit}")).unwrap();
            assert_eq!(spec.window_secs(), secs, "unit {unit}");
        }
    }

    #[test]
    fn test_units_are_case_sensitive() {
        assert!(LimitSpec::parse("10/S").is_err());
        assert!(LimitSpec::parse("10/MIN").is_err());
        assert!(LimitSpec::parse("10/Hours").is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "bad",
            "",
            "/min",
            "10/",
            "10/fortnight",
            "ten/min",
            "-1/min",
            "10/2",
            "10/2  min",
            "10/x min",
            " 10/min",
            "10/min ",
            "10/min/s",
        ] {
            let err = LimitSpec::parse(text).unwrap_err();
            assert!(
                matches!(err, QuotaguardError::InvalidLimitSpec { .. }),
                "{text:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_rejects_zero_and_overflow() {
        assert!(LimitSpec::parse("0/min").is_err());
        assert!(LimitSpec::parse("10/0 min").is_err());
        assert!(LimitSpec::parse("99999999999999999999999/min").is_err());
        assert!(LimitSpec::parse("1/18446744073709551615 days").is_err());
    }

    #[test]
    fn test_parse_is_pure() {
        assert_eq!(
            LimitSpec::parse("120/2 hours").unwrap(),
            LimitSpec::parse("120/2 hours").unwrap()
        );
    }

    #[test]
    fn test_equivalent_text_is_distinct() {
        let a = LimitSpec::parse("60/min").unwrap();
        let b = LimitSpec::parse("60/1 min").unwrap();
        assert_eq!(a.window_secs(), b.window_secs());
        assert_ne!(a, b);
    }

    #[test]
    fn test_frame_and_wait() {
        let spec = LimitSpec::parse("3/min").unwrap();
        assert_eq!(spec.frame_at(125), 2);
        assert_eq!(spec.wait_at(125), 55);
        assert_eq!(spec.wait_at(120), 60);
        assert_eq!(spec.wait_at(179), 1);
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let specs: Vec<LimitSpec> = serde_yaml::from_str("[\"10/min\", \"120/2 hours\"]").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[1].window_secs(), 7200);

        let err = serde_yaml::from_str::<Vec<LimitSpec>>("[\"10/fortnight\"]");
        assert!(err.is_err());
    }
}
