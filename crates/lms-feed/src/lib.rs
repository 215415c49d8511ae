//! Tab-separated feed parsing and start/end date resolution.

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use lms_core::{data_dump, non_blank, FeedRecord, FIELD_COUNT};
use thiserror::Error;

pub const CRATE_NAME: &str = "lms-feed";

/// `MM/DD/YYYY` and `HH:MM:SS` joined by a single space.
pub const DATE_TIME_FORMAT: &str = "%m/%d/%Y %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("expected {expected} fields, found {found}: {}", data_dump(.fields))]
    FieldCount {
        expected: usize,
        found: usize,
        fields: Vec<String>,
    },
}

impl RecordError {
    pub fn fields(&self) -> &[String] {
        match self {
            Self::FieldCount { fields, .. } => fields,
        }
    }
}

/// Splits one data line on tabs. Values are returned untrimmed.
pub fn parse_line(line: &str) -> Result<FeedRecord, RecordError> {
    let fields: Vec<&str> = line.split('\t').collect();
    FeedRecord::from_fields(&fields).ok_or_else(|| RecordError::FieldCount {
        expected: FIELD_COUNT,
        found: fields.len(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
    })
}

/// Yields `(line_number, parsed)` for every data line. The first line is the
/// header and is always dropped. An empty line is a data line with one field.
/// Line numbers are 1-based and count the header.
pub fn records(text: &str) -> impl Iterator<Item = (usize, Result<FeedRecord, RecordError>)> + '_ {
    text.lines()
        .enumerate()
        .skip(1)
        .map(|(idx, line)| (idx + 1, parse_line(line)))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("unparseable date {date:?} {time:?} (expected MM/DD/YYYY HH:MM:SS)")]
    Unparseable { date: String, time: String },
    #[error("local time {date} {time} does not exist in {zone}")]
    NonexistentLocalTime {
        date: String,
        time: String,
        zone: String,
    },
}

impl DateError {
    pub fn date(&self) -> &str {
        match self {
            Self::Unparseable { date, .. } | Self::NonexistentLocalTime { date, .. } => date.as_str(),
        }
    }

    pub fn time(&self) -> &str {
        match self {
            Self::Unparseable { time, .. } | Self::NonexistentLocalTime { time, .. } => time.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("record has no start date or start time")]
    MissingStart,
    #[error(transparent)]
    Date(#[from] DateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSchedule {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    tz: Tz,
}

impl DateResolver {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn resolve(&self, date: &str, time: &str) -> Result<DateTime<FixedOffset>, DateError> {
        let (date, time) = (date.trim(), time.trim());
        let combined = format!("{date} {time}");
        let naive = NaiveDateTime::parse_from_str(&combined, DATE_TIME_FORMAT).map_err(|_| {
            DateError::Unparseable {
                date: date.to_string(),
                time: time.to_string(),
            }
        })?;

        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => Ok(dt.fixed_offset()),
            // Repeated hour at the end of DST: take the first occurrence.
            LocalResult::Ambiguous(earliest, _) => Ok(earliest.fixed_offset()),
            LocalResult::None => Err(DateError::NonexistentLocalTime {
                date: date.to_string(),
                time: time.to_string(),
                zone: self.tz.name().to_string(),
            }),
        }
    }

    /// A record needs a start; a missing end collapses onto the start.
    pub fn resolve_schedule(&self, record: &FeedRecord) -> Result<EventSchedule, ScheduleError> {
        let (Some(start_date), Some(start_time)) =
            (non_blank(&record.start_date), non_blank(&record.start_time))
        else {
            return Err(ScheduleError::MissingStart);
        };
        let start = self.resolve(start_date, start_time)?;

        let end = match (non_blank(&record.end_date), non_blank(&record.end_time)) {
            (Some(end_date), Some(end_time)) => self.resolve(end_date, end_time)?,
            _ => start,
        };

        Ok(EventSchedule { start, end })
    }
}
