//! Binary cache file.
//!
//! Layout, all integers little-endian `u64`:
//!
//! ```text
//! [written_at minutes] ([payload length N] [N bytes of JSON ChannelRecord])*
//! ```
//!
//! Reads never fail: a missing, expired or damaged file is a miss.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tracing::instrument;
use tvprog_api::schedule::{Channel, ChannelMap};
use tvprog_api::time::{from_storage_unit, now_minutes};

use crate::record::{ChannelRecord, RecordId, pack, unpack};

/// Minutes after which a cache file is stale (48 hours).
pub const EXPIRY_MINUTES: i64 = 2880;

/// Cache file name inside the cache directory.
const CACHE_FILE_NAME: &str = "guide.cache";

/// Resolves the cache file path.
///
/// - If `dir` is `Some`, returns `{dir}/guide.cache`.
/// - Otherwise `$XDG_CACHE_HOME/tvprog/guide.cache`, falling back to
///   `~/.cache/tvprog/guide.cache` when the variable is unset or empty.
///
/// # Errors
///
/// Returns an error if neither `XDG_CACHE_HOME` nor `HOME` is usable (when
/// `dir` is `None`).
pub fn resolve_cache_path(dir: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(d) = dir {
        return Ok(d.join(CACHE_FILE_NAME));
    }

    let base = match std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        Some(xdg) => PathBuf::from(xdg),
        None => {
            let home = std::env::var("HOME").context("HOME environment variable is not set")?;
            PathBuf::from(home).join(".cache")
        }
    };
    Ok(base.join("tvprog").join(CACHE_FILE_NAME))
}

/// Overview of a cache file, for maintenance commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSummary {
    /// Write time from the header, if it could be read.
    pub written_at: Option<DateTime<Utc>>,
    /// Ids of the readable records, in file order.
    pub channel_ids: Vec<String>,
    /// Whether the file is past its expiry.
    pub expired: bool,
    /// Whether reading stopped on a damaged header or record.
    pub corrupted: bool,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// Handle to the cache file at a fixed path.
#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    /// Creates a store for `path`. Nothing is touched on disk.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the cache file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up one channel in the cache, using the current time for expiry.
    #[must_use]
    pub fn read_channel(&self, id: &str) -> Option<Channel> {
        self.read_channel_at(id, now_minutes())
    }

    /// Looks up one channel in the cache as of `now` (minutes since epoch).
    ///
    /// Returns `None` when the file is absent, expired, damaged, or holds no
    /// record for `id`. Only the first record with a matching id is decoded.
    #[must_use]
    pub fn read_channel_at(&self, id: &str, now: i64) -> Option<Channel> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "Cache file not found");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cache file unreadable");
                return None;
            }
        };

        match find_channel(BufReader::new(file), id, now) {
            Ok(Lookup::Hit(channel)) => {
                tracing::debug!(channel = id, "Cache hit");
                Some(channel)
            }
            Ok(Lookup::Absent) => {
                tracing::debug!(channel = id, "Channel not in cache");
                None
            }
            Ok(Lookup::Expired { written_at }) => {
                tracing::info!(written_at, "Cache file expired");
                None
            }
            Err(e) => {
                let reason = format!("{e:#}");
                tracing::warn!(
                    path = %self.path.display(),
                    error = %reason,
                    "Cache file corrupted, ignoring"
                );
                None
            }
        }
    }

    /// Replaces the cache with `channels`, stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_all(&self, channels: &ChannelMap) -> Result<()> {
        self.write_all_at(channels, now_minutes())
    }

    /// Replaces the cache with `channels`, stamped with `now` (minutes since epoch).
    ///
    /// The file is truncated and rewritten in full, one record per channel in
    /// map order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn write_all_at(&self, channels: &ChannelMap, now: i64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let file = File::create(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;
        let mut writer = BufWriter::new(file);

        let header = u64::try_from(now).context("cache timestamp precedes the epoch")?;
        writer
            .write_all(&header.to_le_bytes())
            .context("failed to write cache header")?;

        for channel in channels.values() {
            let payload = serde_json::to_vec(&pack(channel))
                .with_context(|| format!("failed to encode channel {}", channel.id))?;
            let len = u64::try_from(payload.len()).context("record too large")?;
            writer
                .write_all(&len.to_le_bytes())
                .and_then(|()| writer.write_all(&payload))
                .with_context(|| format!("failed to write channel {}", channel.id))?;
        }

        writer.flush().context("failed to flush cache file")?;
        tracing::info!(channels = channels.len(), "Cache written");
        Ok(())
    }

    /// Summarises the cache file, using the current time for expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn inspect(&self) -> Result<Option<CacheSummary>> {
        self.inspect_at(now_minutes())
    }

    /// Summarises the cache file as of `now` (minutes since epoch).
    ///
    /// Returns `Ok(None)` when there is no cache file. Damage is reported
    /// through [`CacheSummary::corrupted`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened.
    pub fn inspect_at(&self, now: i64) -> Result<Option<CacheSummary>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to open {}", self.path.display()));
            }
        };
        let size_bytes = file
            .metadata()
            .with_context(|| format!("failed to stat {}", self.path.display()))?
            .len();

        let mut records = RecordReader::new(BufReader::new(file));
        let mut summary = CacheSummary {
            written_at: None,
            channel_ids: Vec::new(),
            expired: false,
            corrupted: false,
            size_bytes,
        };

        let header = match records.header() {
            Ok(header) => header,
            Err(e) => {
                tracing::debug!(error = %format!("{e:#}"), "Cache header unreadable");
                summary.corrupted = true;
                return Ok(Some(summary));
            }
        };
        summary.written_at = from_storage_unit(header);
        summary.expired = is_expired(header, now);

        loop {
            match records.next_id() {
                Ok(Some((record_id, _))) => summary.channel_ids.push(record_id),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %format!("{e:#}"), "Cache record unreadable");
                    summary.corrupted = true;
                    break;
                }
            }
        }

        Ok(Some(summary))
    }

    /// Deletes the cache file. Returns whether a file was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cache file removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }
}

/// Outcome of a lookup over a readable file.
enum Lookup {
    Hit(Channel),
    Absent,
    Expired { written_at: i64 },
}

fn is_expired(written_at: i64, now: i64) -> bool {
    written_at.saturating_add(EXPIRY_MINUTES) < now
}

/// Scans the records for `id`. Any `Err` means the file is damaged.
fn find_channel<R: BufRead>(reader: R, id: &str, now: i64) -> Result<Lookup> {
    let mut records = RecordReader::new(reader);

    let written_at = records.header()?;
    if is_expired(written_at, now) {
        return Ok(Lookup::Expired { written_at });
    }

    while let Some((record_id, payload)) = records.next_id()? {
        if record_id != id {
            continue;
        }
        let record: ChannelRecord = serde_json::from_slice(&payload)
            .with_context(|| format!("malformed record for channel {record_id}"))?;
        return unpack(record).map(Lookup::Hit);
    }

    Ok(Lookup::Absent)
}

/// Sequential reader over the cache layout.
struct RecordReader<R> {
    reader: R,
}

impl<R: BufRead> RecordReader<R> {
    const fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Reads the write-time header.
    fn header(&mut self) -> Result<i64> {
        let raw = self.read_u64().context("missing cache header")?;
        i64::try_from(raw).context("cache header out of range")
    }

    /// Reads the next record and decodes only its id.
    ///
    /// Returns `Ok(None)` at a clean end of file, that is, exactly on a
    /// record boundary.
    fn next_id(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        let at_eof = self
            .reader
            .fill_buf()
            .context("failed to read cache file")?
            .is_empty();
        if at_eof {
            return Ok(None);
        }

        let len = self.read_u64().context("truncated record length")?;
        let payload = self.read_payload(len)?;
        let RecordId { id } =
            serde_json::from_slice(&payload).context("malformed record payload")?;
        Ok(Some((id, payload)))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0_u8; 8];
        self.reader.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads exactly `len` bytes without trusting `len` for the allocation.
    fn read_payload(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        self.reader
            .by_ref()
            .take(len)
            .read_to_end(&mut payload)
            .context("failed to read record payload")?;

        if u64::try_from(payload.len()).ok() != Some(len) {
            bail!(
                "truncated record payload: expected {len} bytes, got {}",
                payload.len()
            );
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::fs::OpenOptions;

    use tracing::subscriber::with_default;
    use tracing_mock::{expect, subscriber};
    use tvprog_api::schedule::ProgramItem;

    use super::*;

    const WRITTEN_AT: i64 = 28_400_000;

    fn channel(id: &str, name: &str, titles: &[&str]) -> Channel {
        let mut channel = Channel::new(id, name);
        let mut start = WRITTEN_AT;
        for title in titles {
            channel.programs.push(ProgramItem {
                channel_id: String::from(id),
                start: from_storage_unit(start).unwrap(),
                end: from_storage_unit(start + 30).unwrap(),
                title: String::from(*title),
                description: None,
                category: None,
            });
            start += 30;
        }
        channel
    }

    fn guide() -> ChannelMap {
        let mut tf1 = channel("tf1.fr", "TF1", &["Le Journal", "Le Film"]);
        tf1.icon = Some(String::from("https://example.com/tf1.png"));
        [
            tf1,
            channel("france2.fr", "France 2", &["Journal 20h"]),
        ]
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect()
    }

    fn store_in(dir: &tempfile::TempDir) -> CacheStore {
        CacheStore::new(dir.path().join(CACHE_FILE_NAME))
    }

    fn truncate_by(path: &Path, bytes: u64) {
        let file = OpenOptions::new().write(true).open(path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - bytes).unwrap();
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let channels = guide();

        // Act
        store.write_all_at(&channels, WRITTEN_AT).unwrap();
        let read = store.read_channel_at("tf1.fr", WRITTEN_AT).unwrap();

        // Assert
        assert_eq!(&read, channels.get("tf1.fr").unwrap());
    }

    #[test]
    fn test_read_absent_file_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_read_unknown_channel_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("arte.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_expiry_boundaries() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT + 2879).is_some());
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT + 2880).is_some());
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT + 2881).is_none());
    }

    #[test]
    fn test_write_all_replaces_previous_contents() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();
        let replacement: ChannelMap = [channel("arte.fr", "Arte", &["Doc"])]
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        // Act
        store.write_all_at(&replacement, WRITTEN_AT + 10).unwrap();

        // Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT + 10).is_none());
        assert_eq!(
            store.read_channel_at("arte.fr", WRITTEN_AT + 10).unwrap().name,
            "Arte"
        );
    }

    #[test]
    fn test_write_creates_parent_directories() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path().join("nested").join("deeper").join("g.cache"));

        // Act
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();

        // Assert
        assert!(store.path().exists());
    }

    #[test]
    fn test_truncated_payload_is_miss_with_warning() {
        // Arrange: france2.fr is written first, tf1.fr loses its tail
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();
        truncate_by(store.path(), 5);

        let (subscriber, handle) = subscriber::mock()
            .event(expect::event().at_level(tracing::Level::WARN))
            .only()
            .run_with_handle();

        // Act
        let found = with_default(subscriber, || store.read_channel_at("tf1.fr", WRITTEN_AT));

        // Assert
        assert!(found.is_none());
        handle.assert_finished();
    }

    #[test]
    fn test_records_before_damage_are_still_served() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();
        truncate_by(store.path(), 5);

        // Act
        let found = store.read_channel_at("france2.fr", WRITTEN_AT);

        // Assert
        assert_eq!(found.unwrap().name, "France 2");
    }

    #[test]
    fn test_truncated_length_is_miss() {
        // Arrange: header plus three bytes of a length prefix
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut bytes = u64::try_from(WRITTEN_AT).unwrap().to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 0, 0]);
        std::fs::write(store.path(), bytes).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_huge_length_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let mut bytes = u64::try_from(WRITTEN_AT).unwrap().to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        bytes.extend_from_slice(b"{}");
        std::fs::write(store.path(), bytes).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_malformed_json_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let payload = b"not json";
        let mut bytes = u64::try_from(WRITTEN_AT).unwrap().to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::try_from(payload.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(payload);
        std::fs::write(store.path(), bytes).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_newer_record_version_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let payload = br#"{"v":9,"id":"tf1.fr","name":"TF1"}"#;
        let mut bytes = u64::try_from(WRITTEN_AT).unwrap().to_le_bytes().to_vec();
        bytes.extend_from_slice(&u64::try_from(payload.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(payload);
        std::fs::write(store.path(), bytes).unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_empty_file_is_miss() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), b"").unwrap();

        // Act & Assert
        assert!(store.read_channel_at("tf1.fr", WRITTEN_AT).is_none());
    }

    #[test]
    fn test_inspect_absent_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();

        // Act & Assert
        assert!(store_in(&dir).inspect_at(WRITTEN_AT).unwrap().is_none());
    }

    #[test]
    fn test_inspect_lists_records_in_file_order() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();

        // Act
        let summary = store.inspect_at(WRITTEN_AT + 60).unwrap().unwrap();

        // Assert
        assert_eq!(summary.channel_ids, vec!["france2.fr", "tf1.fr"]);
        assert_eq!(summary.written_at, from_storage_unit(WRITTEN_AT));
        assert!(!summary.expired);
        assert!(!summary.corrupted);
        assert!(summary.size_bytes > 8);
    }

    #[test]
    fn test_inspect_flags_expired_and_corrupted() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();
        truncate_by(store.path(), 5);

        // Act
        let summary = store.inspect_at(WRITTEN_AT + 3000).unwrap().unwrap();

        // Assert
        assert_eq!(summary.channel_ids, vec!["france2.fr"]);
        assert!(summary.expired);
        assert!(summary.corrupted);
    }

    #[test]
    fn test_clear_removes_file() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write_all_at(&guide(), WRITTEN_AT).unwrap();

        // Act
        let removed = store.clear().unwrap();

        // Assert
        assert!(removed);
        assert!(!store.path().exists());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn test_resolve_cache_path_with_dir() {
        // Arrange
        let dir = PathBuf::from("/tmp/myproject");

        // Act
        let path = resolve_cache_path(Some(&dir)).unwrap();

        // Assert
        assert_eq!(path, PathBuf::from("/tmp/myproject/guide.cache"));
    }

    #[test]
    fn test_resolve_cache_path_default() {
        // Arrange & Act
        let path = resolve_cache_path(None).unwrap();

        // Assert
        assert!(path.ends_with("tvprog/guide.cache"));
    }
}
