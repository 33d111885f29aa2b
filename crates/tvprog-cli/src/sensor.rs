//! Program sensors: one per watched channel and time spec.
#![allow(clippy::future_not_send)]

use std::sync::LazyLock;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use tvprog_api::schedule::{Channel, ProgramItem};
use tvprog_api::timespec::TimeSpec;
use tvprog_api::xmltv::LocalGuideSource;
use tvprog_cache::ProgramBuilder;

/// Entity id namespace.
const DOMAIN: &str = "tv_program";

/// State shown when no program is known.
pub const UNKNOWN_STATE: &str = "Unknown";

/// Regex matching runs of non-word characters.
#[allow(clippy::expect_used)]
static NON_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("failed to compile non-word regex"));

/// Details of the program a sensor currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorAttributes {
    /// Program title.
    pub title: String,
    /// Long description.
    pub description: Option<String>,
    /// Genre.
    pub category: Option<String>,
    /// Display name of the channel.
    pub channel_name: String,
    /// Channel logo URL.
    pub channel_icon: Option<String>,
    /// Broadcast start.
    pub start: DateTime<Utc>,
    /// Broadcast end.
    pub end: DateTime<Utc>,
    /// Length in minutes.
    pub duration: i64,
}

/// Tracks what airs on one channel at one time of day.
#[derive(Debug)]
pub struct ProgramSensor {
    channel_id: String,
    time: String,
    spec: Option<TimeSpec>,
    channel: Option<Channel>,
    current: Option<ProgramItem>,
}

impl ProgramSensor {
    /// Creates a sensor in the `Unknown` state.
    ///
    /// An unparseable time spec is logged once; such a sensor stays `Unknown`.
    pub fn new(channel_id: impl Into<String>, time: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        let time = time.into();
        let spec = TimeSpec::parse(&time);
        if spec.is_none() {
            tracing::warn!(
                channel = %channel_id,
                "Unrecognised time spec '{time}', sensor will stay {UNKNOWN_STATE}"
            );
        }
        Self {
            channel_id,
            time,
            spec,
            channel: None,
            current: None,
        }
    }

    /// `tv_program.<channel id without non-word characters>_<time spec>`.
    #[must_use]
    pub fn entity_id(&self) -> String {
        format!(
            "{DOMAIN}.{}_{}",
            NON_WORD_RE.replace_all(&self.channel_id, ""),
            self.time
        )
    }

    /// `<channel id>.<time spec>`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}.{}", self.channel_id, self.time)
    }

    /// Current program title, or `Unknown`.
    #[must_use]
    pub fn state(&self) -> &str {
        self.current
            .as_ref()
            .map_or(UNKNOWN_STATE, |p| p.title.as_str())
    }

    /// Details of the current program, if any.
    #[must_use]
    pub fn attributes(&self) -> Option<SensorAttributes> {
        let program = self.current.as_ref()?;
        let channel = self.channel.as_ref()?;
        Some(SensorAttributes {
            title: program.title.clone(),
            description: program.description.clone(),
            category: program.category.clone(),
            channel_name: channel.name.clone(),
            channel_icon: channel.icon.clone(),
            start: program.start,
            end: program.end,
            duration: program.duration_minutes(),
        })
    }

    /// Refreshes the sensor through `builder` as of `now`.
    ///
    /// On error the previous state is kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the guide cannot be fetched or cached.
    pub async fn update<S, Tz>(
        &mut self,
        builder: &ProgramBuilder<S>,
        provider: &str,
        now: &DateTime<Tz>,
    ) -> Result<()>
    where
        S: LocalGuideSource + Sync,
        Tz: TimeZone,
    {
        if self.spec.is_none() {
            self.apply(None, now);
            return Ok(());
        }
        let channel = builder.create_program(provider, &self.channel_id).await?;
        self.apply(channel, now);
        Ok(())
    }

    /// Points the sensor at the program of `channel` airing at its time spec.
    fn apply<Tz: TimeZone>(&mut self, channel: Option<Channel>, now: &DateTime<Tz>) {
        let at = self.spec.and_then(|spec| spec.resolve(now));
        self.current = match (&channel, at) {
            (Some(channel), Some(at)) => channel.program_at(at).cloned(),
            _ => None,
        };
        self.channel = channel;
    }
}

/// Creates one sensor per channel and time spec, channels outermost.
pub fn create_sensors(channels: &[String], times: &[String]) -> Vec<ProgramSensor> {
    channels
        .iter()
        .flat_map(|channel| {
            times
                .iter()
                .map(move |time| ProgramSensor::new(channel, time))
        })
        .collect()
}
