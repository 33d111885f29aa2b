//! XMLTV guide client library for tvprog.
//!
//! Provides the schedule model, XMLTV timestamp handling, the streaming
//! XMLTV parser and the provider client.

/// Channel and program model.
pub mod schedule;

/// XMLTV timestamps and storage units.
pub mod time;

/// Query-time specs.
pub mod timespec;

/// XMLTV provider client and parser.
pub mod xmltv;
