//! XMLTV provider module.
//!
//! Retrieves guide documents over HTTP(S) or from `file://` URLs and turns
//! them into channel listings.

mod api;
mod client;
mod parser;

#[allow(clippy::module_name_repetitions)]
pub use api::{GuideSource, LocalGuideSource};
#[allow(clippy::module_name_repetitions)]
pub use client::{XmltvClient, XmltvClientBuilder};
pub use parser::{parse_guide, parse_guide_str};
