//! XMLTV timestamp parsing and minute-granularity storage conversion.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use regex::Regex;

/// Length of the `YYYYMMDDHHMM` prefix of an XMLTV timestamp.
const DATE_PREFIX_LEN: usize = 12;

/// Seconds in one storage unit.
const SECS_PER_MINUTE: i64 = 60;

/// Regex for `"<hours>h<minutes>"` duration specs.
#[allow(clippy::expect_used)]
static DURATION_SPEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]+)h([0-9]{0,2})").expect("failed to compile duration spec regex")
});

/// A timestamp string that does not follow the XMLTV `YYYYMMDDHHMM[ ±HHMM]` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedTimestamp {
    raw: String,
}

impl MalformedTimestamp {
    fn new(raw: &str) -> Self {
        Self {
            raw: String::from(raw),
        }
    }

    /// The rejected input.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for MalformedTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed XMLTV timestamp: {:?}", self.raw)
    }
}

impl std::error::Error for MalformedTimestamp {}

/// Parses an XMLTV timestamp into a UTC instant.
///
/// The first 12 characters are read as `YYYYMMDDHHMM` in UTC. Anything after
/// them (seconds, whitespace) is skipped up to an optional `+HHMM` / `-HHMM`
/// offset, which is negated and applied: `+0100` moves the instant one hour
/// earlier, `-0500` five hours later.
///
/// # Errors
///
/// Returns [`MalformedTimestamp`] if the input is shorter than 12 characters,
/// the date portion does not parse, or the offset digits are invalid.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedTimestamp> {
    let malformed = || MalformedTimestamp::new(raw);

    let date_part = raw.get(..DATE_PREFIX_LEN).ok_or_else(malformed)?;
    let parsed = NaiveDateTime::parse_from_str(date_part, "%Y%m%d%H%M")
        .map_err(|_| malformed())?
        .and_utc();

    let rest = raw.get(DATE_PREFIX_LEN..).unwrap_or_default();
    let Some(sign_pos) = rest.find(['+', '-']) else {
        return Ok(parsed);
    };
    let offset_part = rest.get(sign_pos..).unwrap_or_default();
    let (is_negative, offset) = parse_offset(offset_part).ok_or_else(malformed)?;

    let shifted = if is_negative {
        parsed.checked_add_signed(offset)
    } else {
        parsed.checked_sub_signed(offset)
    };
    shifted.ok_or_else(malformed)
}

/// Parses `±HHMM` into its sign (`true` for `-`) and magnitude.
#[allow(clippy::arithmetic_side_effects)]
fn parse_offset(s: &str) -> Option<(bool, TimeDelta)> {
    let is_negative = s.starts_with('-');
    let hours = parse_two_digits(s.get(1..3)?)?;
    let minutes = parse_two_digits(s.get(3..5)?)?;
    let offset = TimeDelta::try_minutes(hours * 60 + minutes)?;
    Some((is_negative, offset))
}

fn parse_two_digits(s: &str) -> Option<i64> {
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Converts an instant to whole minutes since the Unix epoch (floored).
#[must_use]
pub fn to_storage_unit(instant: DateTime<Utc>) -> i64 {
    instant.timestamp().div_euclid(SECS_PER_MINUTE)
}

/// Converts minutes since the Unix epoch back to an instant.
///
/// Returns `None` if the value is outside chrono's representable range.
#[must_use]
pub fn from_storage_unit(minutes: i64) -> Option<DateTime<Utc>> {
    let secs = minutes.checked_mul(SECS_PER_MINUTE)?;
    DateTime::from_timestamp(secs, 0)
}

/// Current time in storage units.
#[must_use]
pub fn now_minutes() -> i64 {
    to_storage_unit(Utc::now())
}

/// Parses a `"<hours>h<minutes>"` spec such as `"21h30"` or `"3h"`.
///
/// The pattern is searched anywhere in the input; minutes default to 0.
/// Returns `None` when nothing matches, which callers must handle.
#[must_use]
pub fn parse_duration_spec(raw: &str) -> Option<TimeDelta> {
    let caps = DURATION_SPEC_RE.captures(raw)?;
    let hours: i64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: i64 = match caps.get(2).map(|m| m.as_str()) {
        None | Some("") => 0,
        Some(m) => m.parse().ok()?,
    };
    TimeDelta::try_hours(hours)?.checked_add(&TimeDelta::try_minutes(minutes)?)
}
