//! `GuideSource` trait definition.
#![allow(clippy::future_not_send)]

use anyhow::Result;

use crate::schedule::ChannelMap;

/// Provider of complete XMLTV guide documents.
///
/// Abstracts retrieval so the fetch orchestrator can be driven by a test
/// double. Uses `trait_variant::make` to generate a `Send`-bound async trait.
#[allow(clippy::module_name_repetitions)]
#[trait_variant::make(GuideSource: Send)]
pub trait LocalGuideSource {
    /// Retrieves the document at `provider` and ingests every channel in it.
    ///
    /// # Errors
    ///
    /// Returns an error if retrieval fails, the provider answers with an HTTP
    /// error status, or the document cannot be ingested.
    async fn fetch_guide(&self, provider: &str) -> Result<ChannelMap>;
}
