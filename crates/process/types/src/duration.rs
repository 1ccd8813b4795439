//! ISO-8601 durations for timer events.
//!
//! Supports the day/time subset that has a fixed length: `P[nW][nD][T[nH][nM][n[.f]S]]`.
//! Years and months are rejected since their length depends on the calendar.
//! Precision is milliseconds; extra fraction digits are truncated.

use std::time::Duration;

use crate::{ProcessResult, ValidationError};

/// Parse an ISO-8601 duration such as `PT5S`, `PT1H30M` or `P1DT12H`.
pub fn parse_iso8601(text: &str) -> ProcessResult<Duration> {
    let invalid = || ValidationError::InvalidDuration(text.to_string());

    let rest = text.trim().strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((_, "")) => return Err(invalid()),
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut millis: u64 = 0;
    for (amount, unit) in components(date_part, "WD").ok_or_else(invalid)? {
        let scale = match unit {
            'W' => 7 * 86_400_000,
            'D' => 86_400_000,
            _ => return Err(invalid()),
        };
        millis = add_scaled(millis, amount, scale).ok_or_else(invalid)?;
    }

    if let Some(time_part) = time_part {
        for (amount, unit) in components(time_part, "HMS").ok_or_else(invalid)? {
            let scale = match unit {
                'H' => 3_600_000,
                'M' => 60_000,
                'S' => 1_000,
                _ => return Err(invalid()),
            };
            millis = add_scaled(millis, amount, scale).ok_or_else(invalid)?;
        }
    }

    Ok(Duration::from_millis(millis))
}

/// Render a duration in the canonical `PT…S` form accepted by [`parse_iso8601`].
pub fn format_iso8601(duration: Duration) -> String {
    let millis = duration.as_millis();
    let (secs, frac) = (millis / 1000, millis % 1000);
    if frac == 0 {
        format!("PT{}S", secs)
    } else {
        format!("PT{}.{:03}S", secs, frac)
    }
}

/// A component amount as integer milliseconds-ready parts: whole units and
/// thousandths of a unit.
#[derive(Debug, Clone, Copy)]
struct Amount {
    whole: u64,
    thousandths: u64,
}

/// Split a date or time part into amounts, each unit at most once and in
/// the order given by `units`
fn components(part: &str, units: &str) -> Option<Vec<(Amount, char)>> {
    let mut out = Vec::new();
    let mut number = String::new();
    let mut last_unit = None;
    for ch in part.chars() {
        if ch.is_ascii_digit() || ch == '.' || ch == ',' {
            number.push(if ch == ',' { '.' } else { ch });
        } else if ch.is_ascii_alphabetic() {
            if number.is_empty() {
                return None;
            }
            let unit = ch.to_ascii_uppercase();
            let position = units.find(unit)?;
            if last_unit.is_some_and(|last| position <= last) {
                return None;
            }
            last_unit = Some(position);
            out.push((parse_amount(&number)?, unit));
            number.clear();
        } else {
            return None;
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(out)
}

fn parse_amount(number: &str) -> Option<Amount> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let whole = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let digits: String = fraction.chars().chain("000".chars()).take(3).collect();
    Some(Amount {
        whole,
        thousandths: digits.parse().ok()?,
    })
}

fn add_scaled(total: u64, amount: Amount, unit_millis: u64) -> Option<u64> {
    let whole = amount.whole.checked_mul(unit_millis)?;
    let fraction = amount.thousandths.checked_mul(unit_millis)? / 1000;
    total.checked_add(whole)?.checked_add(fraction)
}

/// Serde adapter: writes the ISO-8601 string, reads either an ISO-8601
/// string or an integer number of milliseconds.
pub mod serde_iso8601 {
    use std::fmt;
    use std::time::Duration;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_iso8601(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an ISO-8601 duration or a number of milliseconds")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
            super::parse_iso8601(value).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
            u64::try_from(value)
                .map(Duration::from_millis)
                .map_err(|_| E::custom("duration must not be negative"))
        }
    }
}
