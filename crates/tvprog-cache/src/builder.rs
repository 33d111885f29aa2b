//! `ProgramBuilder` - serves channels from the cache, fetching on a miss.
#![allow(clippy::future_not_send)]

use std::sync::LazyLock;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::instrument;
use tvprog_api::schedule::Channel;
use tvprog_api::xmltv::LocalGuideSource;

use crate::store::CacheStore;

/// Serializes every cache read, fetch and write in the process.
///
/// File I/O runs on the blocking pool while the guard is held.
///
/// Shared by all builders regardless of provider or channel, so a slow
/// fetch holds up every other lookup until it completes.
static CACHE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Resolves channels through the cache, falling back to a full guide fetch.
#[derive(Debug)]
pub struct ProgramBuilder<S> {
    source: S,
    store: CacheStore,
}

impl<S: LocalGuideSource + Sync> ProgramBuilder<S> {
    /// Creates a builder reading through `store` and fetching from `source`.
    pub const fn new(source: S, store: CacheStore) -> Self {
        Self { source, store }
    }

    /// The cache backing this builder.
    #[must_use]
    pub const fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Returns the schedule for `channel_id`.
    ///
    /// Serves it from the cache when the cache is fresh and holds the channel.
    /// Otherwise fetches the whole guide from `provider`, rewrites the cache
    /// with every channel in it, and returns the requested one (`None` if the
    /// provider does not list it). The cache lock is held for the whole
    /// sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch or the cache write fails. Nothing is
    /// cached after a failed fetch.
    #[instrument(skip_all, fields(%provider, channel = channel_id))]
    pub async fn create_program(
        &self,
        provider: &str,
        channel_id: &str,
    ) -> Result<Option<Channel>> {
        let _guard = CACHE_LOCK.lock().await;

        let store = self.store.clone();
        let id = channel_id.to_owned();
        let cached = tokio::task::spawn_blocking(move || store.read_channel(&id))
            .await
            .context("cache read task failed")?;
        if let Some(channel) = cached {
            return Ok(Some(channel));
        }

        let channels = self
            .source
            .fetch_guide(provider)
            .await
            .with_context(|| format!("failed to fetch guide from {provider}"))?;
        let store = self.store.clone();
        let mut channels = tokio::task::spawn_blocking(move || {
            store.write_all(&channels).map(|()| channels)
        })
        .await
        .context("cache write task failed")?
        .context("failed to write guide cache")?;

        let channel = channels.remove(channel_id);
        if channel.is_none() {
            tracing::warn!("Provider does not list channel {channel_id}");
        }
        Ok(channel)
    }
}
