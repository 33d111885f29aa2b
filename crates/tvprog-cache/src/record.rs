//! Serialized form of one cached channel.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tvprog_api::schedule::{Channel, ProgramItem};
use tvprog_api::time::{from_storage_unit, to_storage_unit};

/// Record format version written by this build.
pub const RECORD_VERSION: u32 = 1;

const fn default_version() -> u32 {
    RECORD_VERSION
}

/// A channel as stored in the cache file.
///
/// Timestamps are whole minutes since the Unix epoch. Fields added by later
/// versions are ignored when reading.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Format version; records without one are version 1.
    #[serde(default = "default_version")]
    pub v: u32,
    /// Channel id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Logo URL.
    #[serde(default)]
    pub icon: Option<String>,
    /// Programs in guide order.
    #[serde(default)]
    pub program: Vec<ProgramRecord>,
}

/// A program entry inside a [`ChannelRecord`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgramRecord {
    /// Start, minutes since epoch.
    pub start: i64,
    /// End, minutes since epoch.
    pub end: i64,
    /// Title. Entries without one are skipped on load.
    #[serde(default)]
    pub title: Option<String>,
    /// Long description.
    #[serde(default)]
    pub description: Option<String>,
    /// Genre.
    #[serde(default)]
    pub category: Option<String>,
}

/// Just the id of a record, for scanning without a full decode.
#[derive(Debug, Deserialize)]
pub struct RecordId {
    /// Channel id.
    pub id: String,
}

/// Converts a channel into its stored form.
pub fn pack(channel: &Channel) -> ChannelRecord {
    ChannelRecord {
        v: RECORD_VERSION,
        id: channel.id.clone(),
        name: channel.name.clone(),
        icon: channel.icon.clone(),
        program: channel
            .programs
            .iter()
            .map(|p| ProgramRecord {
                start: to_storage_unit(p.start),
                end: to_storage_unit(p.end),
                title: Some(p.title.clone()),
                description: p.description.clone(),
                category: p.category.clone(),
            })
            .collect(),
    }
}

/// Rebuilds a channel from its stored form.
///
/// Program entries without a title or with out-of-range timestamps are
/// skipped.
///
/// # Errors
///
/// Returns an error if the record was written by a newer format version.
pub fn unpack(record: ChannelRecord) -> Result<Channel> {
    if record.v > RECORD_VERSION {
        bail!(
            "unsupported record version {} for channel {}",
            record.v,
            record.id
        );
    }

    let channel_id = record.id;
    let programs = record
        .program
        .into_iter()
        .filter_map(|p| {
            Some(ProgramItem {
                channel_id: channel_id.clone(),
                start: from_storage_unit(p.start)?,
                end: from_storage_unit(p.end)?,
                title: p.title?,
                description: p.description,
                category: p.category,
            })
        })
        .collect();

    Ok(Channel {
        id: channel_id,
        name: record.name,
        icon: record.icon,
        programs,
    })
}
