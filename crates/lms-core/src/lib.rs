//! Core domain model and collaborator contracts for the LMS event importer.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "lms-core";

/// Number of tab-separated fields in every feed data line.
pub const FIELD_COUNT: usize = 17;

pub const EVENT_TEMPLATE: &str = "/apps/events/templates/event";
pub const EVENT_RESOURCE_TYPE: &str = "events/components/page/event";
pub const EVENT_SCAFFOLDING: &str = "/etc/scaffolding/events/event";
pub const CALL_TO_ACTION_TEXT: &str = "Register";
pub const DEFAULT_ENTRY_NAME: &str = "imported-training-event";

/// Title characters kept before the `-mon-dd` suffix; 64 minus the suffix width.
pub const TITLE_SLUG_LIMIT: usize = 57;

/// One data line of the feed, by name rather than column position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeedRecord {
    pub title: String,
    pub locator_number: String,
    pub description: String,
    pub location: String,
    pub host: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub start_date: String,
    pub start_time: String,
    pub end_date: String,
    pub end_time: String,
    pub is_active: String,
    pub uid: String,
    pub summary: String,
    pub opt_in: String,
    pub deep_link: String,
}

impl FeedRecord {
    /// Builds a record from exactly [`FIELD_COUNT`] columns in feed order.
    pub fn from_fields<S: AsRef<str>>(fields: &[S]) -> Option<Self> {
        let [title, locator_number, description, location, host, contact_name, contact_email, contact_phone, start_date, start_time, end_date, end_time, is_active, uid, summary, opt_in, deep_link] =
            fields
        else {
            return None;
        };
        let own = |s: &S| s.as_ref().to_string();
        Some(Self {
            title: own(title),
            locator_number: own(locator_number),
            description: own(description),
            location: own(location),
            host: own(host),
            contact_name: own(contact_name),
            contact_email: own(contact_email),
            contact_phone: own(contact_phone),
            start_date: own(start_date),
            start_time: own(start_time),
            end_date: own(end_date),
            end_time: own(end_time),
            is_active: own(is_active),
            uid: own(uid),
            summary: own(summary),
            opt_in: own(opt_in),
            deep_link: own(deep_link),
        })
    }

    pub fn fields(&self) -> [&str; FIELD_COUNT] {
        [
            &self.title,
            &self.locator_number,
            &self.description,
            &self.location,
            &self.host,
            &self.contact_name,
            &self.contact_email,
            &self.contact_phone,
            &self.start_date,
            &self.start_time,
            &self.end_date,
            &self.end_time,
            &self.is_active,
            &self.uid,
            &self.summary,
            &self.opt_in,
            &self.deep_link,
        ]
    }

    /// Only the literal `false` (any case) unpublishes an entry.
    pub fn is_active(&self) -> bool {
        !self.is_active.trim().eq_ignore_ascii_case("false")
    }

    pub fn data_dump(&self) -> String {
        data_dump(&self.fields())
    }
}

/// Each raw field followed by `||`, the format used in alerts and error logs.
pub fn data_dump<S: AsRef<str>>(fields: &[S]) -> String {
    fields.iter().fold(String::new(), |mut out, field| {
        out.push_str(field.as_ref());
        out.push_str("||");
        out
    })
}

pub fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Joins repository path segments with exactly one `/` between them.
pub fn join_path(base: &str, segment: &str) -> String {
    let base = base.trim_end_matches('/');
    let segment = segment.trim_start_matches('/');
    if base.is_empty() {
        format!("/{segment}")
    } else {
        format!("{base}/{segment}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallToAction {
    pub text: String,
    pub url: String,
}

/// The persisted representation of one imported event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: Uuid,
    pub path: String,
    pub name: String,
    pub title: String,
    pub template: String,
    pub resource_type: String,
    pub scaffolding: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub host: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub summary: Option<String>,
    pub uid: Option<String>,
    pub call_to_action: Option<CallToAction>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventEntry {
    pub fn new(parent: &str, name: &str, fields: &EventFields) -> Self {
        let now = Utc::now();
        let mut entry = Self {
            id: Uuid::new_v4(),
            path: join_path(parent, name),
            name: name.to_string(),
            title: String::new(),
            template: EVENT_TEMPLATE.to_string(),
            resource_type: EVENT_RESOURCE_TYPE.to_string(),
            scaffolding: EVENT_SCAFFOLDING.to_string(),
            description: None,
            location: None,
            host: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            summary: None,
            uid: None,
            call_to_action: None,
            start: fields.start,
            end: fields.end,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        entry.apply(fields);
        entry
    }

    /// Overwrites the fields a record supplies; absent values keep what is stored.
    pub fn apply(&mut self, fields: &EventFields) {
        fn set<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }

        if let Some(title) = &fields.title {
            self.title = title.clone();
        }
        self.template = EVENT_TEMPLATE.to_string();
        self.resource_type = EVENT_RESOURCE_TYPE.to_string();
        self.scaffolding = EVENT_SCAFFOLDING.to_string();
        self.start = fields.start;
        self.end = fields.end;
        set(&mut self.description, &fields.description);
        set(&mut self.location, &fields.location);
        set(&mut self.host, &fields.host);
        set(&mut self.contact_name, &fields.contact_name);
        set(&mut self.contact_email, &fields.contact_email);
        set(&mut self.contact_phone, &fields.contact_phone);
        set(&mut self.summary, &fields.summary);
        set(&mut self.uid, &fields.uid);
        set(&mut self.call_to_action, &fields.call_to_action);
        if !fields.tags.is_empty() {
            self.tags = fields.tags.clone();
        }
        self.updated_at = Utc::now();
    }
}

/// The conditional field set derived from one feed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub host: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub summary: Option<String>,
    pub uid: Option<String>,
    pub call_to_action: Option<CallToAction>,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub tags: Vec<String>,
}

/// "All entries of the event template under `root`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub root: String,
    pub template: String,
}

impl EntryQuery {
    pub fn events_under(root: &str) -> Self {
        Self {
            root: root.to_string(),
            template: EVENT_TEMPLATE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository login failed: {0}")]
    Login(String),
    #[error("invalid repository path {0:?}")]
    InvalidPath(String),
    #[error("no entry at {0}")]
    NotFound(String),
    #[error("repository i/o error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt entry at {path}: {message}")]
    Corrupt { path: String, message: String },
    #[error("{0}")]
    Backend(String),
}

/// A content repository that hands out short-lived authenticated sessions.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    type Session: RepositorySession;

    async fn login(&self) -> Result<Self::Session, RepositoryError>;
}

/// Staged writes are applied by `save`; dropping a session without saving
/// discards them and releases the session.
#[async_trait]
pub trait RepositorySession: Send + Sync {
    async fn find_entries(&self, query: &EntryQuery) -> Result<Vec<EventEntry>, RepositoryError>;

    async fn get(&self, path: &str) -> Result<Option<EventEntry>, RepositoryError>;

    async fn exists(&self, path: &str) -> Result<bool, RepositoryError>;

    /// Returns the canonical tag id, or `None` when the taxonomy has no such tag.
    async fn resolve_tag(&self, tag_id: &str) -> Result<Option<String>, RepositoryError>;

    fn stage_upsert(&mut self, entry: EventEntry);

    fn stage_delete(&mut self, path: &str);

    async fn save(&mut self) -> Result<(), RepositoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicationAction {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub deactivated: bool,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("{action:?} of {path} failed: {message}")]
    Replication {
        action: PublicationAction,
        path: String,
        message: String,
    },
    #[error("replication status for {path} unavailable: {message}")]
    Status { path: String, message: String },
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn activate(&self, path: &str) -> Result<(), PublishError>;

    async fn deactivate(&self, path: &str) -> Result<(), PublishError>;

    async fn status(&self, path: &str) -> Result<ReplicationStatus, PublishError>;
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

/// Outbound email-style channel for operational alerts.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_fields() -> Vec<&'static str> {
        vec![
            "Safety Training",
            "123",
            "Learn safety",
            "Bldg 1",
            "EH&S",
            "Jane Doe",
            "jane@x.org",
            "555-1234",
            "01/15/2024",
            "09:00:00",
            "01/15/2024",
            "11:00:00",
            "TRUE",
            "UID100",
            "Summary text",
            "Yes",
            "https://register.example/100",
        ]
    }

    fn fields_at(hour: u32) -> EventFields {
        let ts = FixedOffset::west_opt(8 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2024, 1, 15, hour, 0, 0)
            .single()
            .expect("ts");
        EventFields {
            title: Some("Safety Training".into()),
            description: None,
            location: Some("Bldg 1".into()),
            host: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            summary: None,
            uid: Some("UID100".into()),
            call_to_action: None,
            start: ts,
            end: ts,
            tags: vec![],
        }
    }

    #[test]
    fn record_maps_fields_by_name() {
        let record = FeedRecord::from_fields(&sample_fields()).expect("17 fields");
        assert_eq!(record.host, "EH&S");
        assert_eq!(record.uid, "UID100");
        assert_eq!(record.deep_link, "https://register.example/100");
        assert_eq!(record.fields().len(), FIELD_COUNT);
        assert!(FeedRecord::from_fields(&sample_fields()[..16]).is_none());
    }

    #[test]
    fn only_literal_false_is_inactive() {
        let mut record = FeedRecord::default();
        for (flag, active) in [("TRUE", true), ("", true), ("no", true), ("False", false), ("false", false)] {
            record.is_active = flag.to_string();
            assert_eq!(record.is_active(), active, "flag {flag:?}");
        }
    }

    #[test]
    fn data_dump_terminates_every_field() {
        assert_eq!(data_dump(&["a", "", "c"]), "a||||c||");
        let record = FeedRecord::from_fields(&sample_fields()).expect("record");
        assert!(record.data_dump().starts_with("Safety Training||123||"));
        assert!(record.data_dump().ends_with("https://register.example/100||"));
    }

    #[test]
    fn join_path_normalizes_slashes() {
        assert_eq!(join_path("/content/events/", "/2024"), "/content/events/2024");
        assert_eq!(join_path("", "a"), "/a");
    }

    #[test]
    fn apply_keeps_values_the_record_leaves_blank() {
        let mut entry = EventEntry::new("/content/events/2024/01", "safety-training-jan-15", &fields_at(9));
        assert_eq!(entry.path, "/content/events/2024/01/safety-training-jan-15");
        assert_eq!(entry.location.as_deref(), Some("Bldg 1"));

        let mut update = fields_at(10);
        update.location = None;
        update.summary = Some("New summary".into());
        entry.apply(&update);

        assert_eq!(entry.location.as_deref(), Some("Bldg 1"));
        assert_eq!(entry.summary.as_deref(), Some("New summary"));
        assert_eq!(entry.start, fields_at(10).start);
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = EventEntry::new("/content/events", "x-jan-15", &fields_at(9));
        let json = serde_json::to_string(&entry).expect("serialize");
        let back: EventEntry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, entry);
    }
}
