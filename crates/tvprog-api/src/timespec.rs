//! Query-time specs (`"now"`, `"tonight"`, `"<N>h<MM>"`).

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::time::parse_duration_spec;

/// Duration spec that `"tonight"` stands for.
const TONIGHT: &str = "21h30";

/// When to look up the airing program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSpec {
    /// The moment of the query.
    Now,
    /// A wall-clock offset from local midnight of the query day.
    SinceMidnight(TimeDelta),
}

impl TimeSpec {
    /// Parses a time spec. Returns `None` for anything that is neither
    /// `"now"`, `"tonight"` nor a `"<hours>h<minutes>"` duration.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "now" => Some(Self::Now),
            "tonight" => parse_duration_spec(TONIGHT).map(Self::SinceMidnight),
            other => parse_duration_spec(other).map(Self::SinceMidnight),
        }
    }

    /// Resolves the spec against `now`, using `now`'s timezone for midnight.
    ///
    /// Returns `None` if the resulting local time does not exist (DST gap)
    /// or overflows.
    #[must_use]
    pub fn resolve<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
        match self {
            Self::Now => Some(now.with_timezone(&Utc)),
            Self::SinceMidnight(offset) => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
                let local = midnight.checked_add_signed(*offset)?;
                let resolved = local.and_local_timezone(now.timezone()).earliest()?;
                Some(resolved.with_timezone(&Utc))
            }
        }
    }
}
