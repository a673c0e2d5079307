//! Parsing of Go-style duration strings such as `5s`, `1m30s` or `250ms`

use std::time::Duration;

use crate::error::{Error, Result};

// Nanoseconds per unit
const UNITS: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("μs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

/// Parse a duration string: a sequence of `<decimal><unit>` terms.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let invalid = |reason: &str| Error::InvalidTimeout {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let mut rest = value.trim();
    if let Some(stripped) = rest.strip_prefix('+') {
        rest = stripped;
    } else if rest.starts_with('-') {
        return Err(invalid("negative durations are not allowed"));
    }

    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }
    if rest == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." {
            return Err(invalid("expected a number"));
        }
        let amount: f64 = number.parse().map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        if unit.is_empty() {
            return Err(invalid("missing unit in duration"));
        }
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| invalid(&format!("unknown unit {unit:?}")))?;
        rest = &rest[unit_len..];

        total += amount * scale;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid("duration out of range"));
    }
    Ok(Duration::from_nanos(total.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_compound_and_fractional() {
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("+1h1m").unwrap(), Duration::from_secs(3660));
    }

    #[test]
    fn test_rejects_bad_syntax() {
        for bad in ["", "5", "abc", "5x", "-1s", "s", "1..5s"] {
            let err = parse_duration(bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidTimeout { .. }),
                "{bad:?} should be rejected"
            );
        }
    }
}
