//! Streaming XMLTV ingestion.
//!
//! The document is consumed as a flat stream of `quick-xml` events and folded
//! into a [`ChannelMap`] by a small state machine:
//!
//! | state              | open tag                     | close tag                  |
//! |--------------------|------------------------------|----------------------------|
//! | `Idle`             | `channel` / `programme`      | -                          |
//! | `InChannel`        | `display-name`, `icon`       | `channel` commits if named |
//! | `InProgram`        | `title`, `desc`, `category`  | `programme` commits        |
//! | `AccumulatingText` | ignored                      | matching tag sets field    |
//!
//! A `programme` is only kept when its channel was committed earlier in the
//! document; programmes listed before their channel are dropped.

use std::borrow::Cow;
use std::io::BufRead;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::schedule::{Channel, ChannelMap, ProgramItem};
use crate::time::parse_timestamp;

/// Element whose text content is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    DisplayName,
    Title,
    Description,
    Category,
}

impl TextField {
    const fn tag(self) -> &'static [u8] {
        match self {
            Self::DisplayName => b"display-name",
            Self::Title => b"title",
            Self::Description => b"desc",
            Self::Category => b"category",
        }
    }
}

#[derive(Debug)]
struct ChannelDraft {
    id: String,
    name: Option<String>,
    icon: Option<String>,
}

#[derive(Debug)]
struct ProgramDraft {
    channel_id: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
}

impl ProgramDraft {
    fn slot(&mut self, field: TextField) -> Option<&mut Option<String>> {
        match field {
            TextField::Title => Some(&mut self.title),
            TextField::Description => Some(&mut self.description),
            TextField::Category => Some(&mut self.category),
            TextField::DisplayName => None,
        }
    }
}

/// Context that text accumulation returns to.
#[derive(Debug)]
enum Parent {
    Channel(ChannelDraft),
    Program(ProgramDraft),
}

impl Parent {
    /// Stores collected text; the first occurrence of a field wins.
    fn finish_text(self, field: TextField, text: String) -> State {
        match self {
            Self::Channel(mut draft) => {
                if draft.name.is_none() {
                    draft.name = Some(String::from(text.trim()));
                }
                State::InChannel(draft)
            }
            Self::Program(mut draft) => {
                if let Some(slot) = draft.slot(field)
                    && slot.is_none()
                {
                    *slot = Some(text);
                }
                State::InProgram(draft)
            }
        }
    }
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    InChannel(ChannelDraft),
    InProgram(ProgramDraft),
    AccumulatingText {
        parent: Parent,
        field: TextField,
        buf: String,
    },
}

fn accumulate(parent: Parent, field: TextField) -> State {
    State::AccumulatingText {
        parent,
        field,
        buf: String::new(),
    }
}

/// Folds XMLTV events into a [`ChannelMap`].
#[derive(Debug, Default)]
struct GuideBuilder {
    state: State,
    channels: ChannelMap,
    dropped_channels: usize,
    dropped_programs: usize,
}

impl GuideBuilder {
    fn on_start(&mut self, e: &BytesStart<'_>) -> Result<()> {
        let name = e.name();
        let state = std::mem::take(&mut self.state);

        let next = match (state, name.as_ref()) {
            (state @ State::AccumulatingText { .. }, _) => state,
            (state, b"channel") => match attribute(e, b"id")? {
                Some(id) => State::InChannel(ChannelDraft {
                    id: String::from(id.trim()),
                    name: None,
                    icon: None,
                }),
                None => state,
            },
            (State::InChannel(draft), b"display-name") => {
                accumulate(Parent::Channel(draft), TextField::DisplayName)
            }
            (State::InChannel(mut draft), b"icon") => {
                if let Some(src) = attribute(e, b"src")? {
                    draft.icon = Some(String::from(src.trim()));
                }
                State::InChannel(draft)
            }
            (state, b"programme") => match (
                attribute(e, b"start")?,
                attribute(e, b"stop")?,
                attribute(e, b"channel")?,
            ) {
                (Some(start), Some(stop), Some(channel)) => State::InProgram(ProgramDraft {
                    channel_id: String::from(channel.trim()),
                    start: parse_timestamp(start.trim())?,
                    end: parse_timestamp(stop.trim())?,
                    title: None,
                    description: None,
                    category: None,
                }),
                _ => state,
            },
            (State::InProgram(draft), b"title") => {
                accumulate(Parent::Program(draft), TextField::Title)
            }
            (State::InProgram(draft), b"desc") => {
                accumulate(Parent::Program(draft), TextField::Description)
            }
            (State::InProgram(draft), b"category") => {
                accumulate(Parent::Program(draft), TextField::Category)
            }
            (state, _) => state,
        };

        self.state = next;
        Ok(())
    }

    fn on_end(&mut self, tag: &[u8]) {
        let state = std::mem::take(&mut self.state);

        let next = match (state, tag) {
            (State::AccumulatingText { parent, field, buf }, tag) if tag == field.tag() => {
                parent.finish_text(field, buf)
            }
            (state @ State::AccumulatingText { .. }, _) => state,
            (State::InChannel(draft), b"channel") => {
                self.commit_channel(draft);
                State::Idle
            }
            (State::InProgram(draft), b"programme") => {
                self.commit_program(draft);
                State::Idle
            }
            (state, _) => state,
        };

        self.state = next;
    }

    fn on_text(&mut self, text: &str) {
        if let State::AccumulatingText { buf, .. } = &mut self.state {
            buf.push_str(text);
        }
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn commit_channel(&mut self, draft: ChannelDraft) {
        let Some(name) = draft.name else {
            tracing::trace!(id = %draft.id, "Dropping channel without display-name");
            self.dropped_channels += 1;
            return;
        };
        self.channels.insert(
            draft.id.clone(),
            Channel {
                id: draft.id,
                name,
                icon: draft.icon,
                programs: Vec::new(),
            },
        );
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn commit_program(&mut self, draft: ProgramDraft) {
        let Some(title) = draft.title else {
            tracing::trace!(channel = %draft.channel_id, "Dropping programme without title");
            self.dropped_programs += 1;
            return;
        };
        let Some(channel) = self.channels.get_mut(&draft.channel_id) else {
            tracing::trace!(channel = %draft.channel_id, %title, "Dropping programme for unknown channel");
            self.dropped_programs += 1;
            return;
        };
        channel.programs.push(ProgramItem {
            channel_id: draft.channel_id,
            start: draft.start,
            end: draft.end,
            title,
            description: draft.description,
            category: draft.category,
        });
    }

    fn finish(self) -> ChannelMap {
        tracing::debug!(
            channels = self.channels.len(),
            programs = self.channels.values().map(|c| c.programs.len()).sum::<usize>(),
            dropped_channels = self.dropped_channels,
            dropped_programs = self.dropped_programs,
            "XMLTV document ingested"
        );
        self.channels
    }
}

/// Reads an attribute value with entities resolved.
fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    let Some(attr) = e
        .try_get_attribute(key)
        .with_context(|| format!("invalid attribute {}", String::from_utf8_lossy(key)))?
    else {
        return Ok(None);
    };
    let raw = utf8(&attr.value)?;
    let value =
        quick_xml::escape::unescape(raw).context("invalid entity in attribute value")?;
    Ok(Some(value.into_owned()))
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).context("XMLTV content is not UTF-8")
}

/// Decodes a text node, resolving any inline entities.
fn unescape_text(bytes: &[u8]) -> Result<Cow<'_, str>> {
    let raw = utf8(bytes)?;
    quick_xml::escape::unescape(raw).context("invalid entity in text content")
}

/// Resolves a `&name;` reference reported as its own event.
fn resolve_reference(name: &[u8]) -> Result<String> {
    let reference = format!("&{};", utf8(name)?);
    let resolved = quick_xml::escape::unescape(&reference)
        .with_context(|| format!("unknown entity reference {reference}"))?;
    Ok(resolved.into_owned())
}

/// Parses a complete XMLTV document into channels with their programs.
///
/// # Errors
///
/// Returns an error if the document is not well-formed XML, or if a
/// `programme` carries a timestamp that fails to parse (the error chain then
/// contains a [`MalformedTimestamp`](crate::time::MalformedTimestamp)).
pub fn parse_guide<R: BufRead>(reader: R) -> Result<ChannelMap> {
    let mut xml = Reader::from_reader(reader);
    let mut buf = Vec::with_capacity(8192);
    let mut builder = GuideBuilder::default();

    loop {
        match xml
            .read_event_into(&mut buf)
            .with_context(|| format!("XMLTV syntax error at byte {}", xml.error_position()))?
        {
            Event::Start(e) => builder.on_start(&e)?,
            Event::Empty(e) => {
                builder.on_start(&e)?;
                builder.on_end(e.name().as_ref());
            }
            Event::End(e) => builder.on_end(e.name().as_ref()),
            Event::Text(e) => builder.on_text(&unescape_text(&e)?),
            Event::CData(e) => builder.on_text(utf8(&e)?),
            Event::GeneralRef(e) => builder.on_text(&resolve_reference(&e)?),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(builder.finish())
}

/// Parses an in-memory XMLTV document.
///
/// # Errors
///
/// See [`parse_guide`].
pub fn parse_guide_str(xml: &str) -> Result<ChannelMap> {
    parse_guide(xml.as_bytes())
}
