//! In-memory program guide: channels and their ordered program lists.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Channels of one guide document, keyed by channel id.
pub type ChannelMap = BTreeMap<String, Channel>;

/// A single broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramItem {
    /// Id of the channel airing the program.
    pub channel_id: String,
    /// Broadcast start.
    pub start: DateTime<Utc>,
    /// Broadcast end (exclusive).
    pub end: DateTime<Utc>,
    /// Program title.
    pub title: String,
    /// Long description.
    pub description: Option<String>,
    /// Genre.
    pub category: Option<String>,
}

impl ProgramItem {
    /// Length of the broadcast in whole minutes.
    #[must_use]
    pub fn duration_minutes(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_minutes()
    }
}

/// A channel and its programs in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Stable external identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Logo URL.
    pub icon: Option<String>,
    /// Programs, assumed chronological.
    pub programs: Vec<ProgramItem>,
}

impl Channel {
    /// Creates a channel with no programs.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            programs: Vec::new(),
        }
    }

    /// Returns the earliest program still airing or upcoming at `ts`.
    ///
    /// Scans forward for the first item whose `end` is after `ts`, so a
    /// program stops matching at its end instant. The list is not re-sorted;
    /// out-of-order input gives whatever the scan hits first.
    #[must_use]
    pub fn program_at(&self, ts: DateTime<Utc>) -> Option<&ProgramItem> {
        self.programs.iter().find(|p| p.end > ts)
    }
}
