use std::collections::HashMap;

use lms_core::{non_blank, ContentRepository, EntryQuery, RepositoryError, RepositorySession};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatus {
    Complete,
    Degraded { reason: String },
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Complete => f.write_str("complete"),
            Self::Degraded { reason } => write!(f, "degraded ({reason})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdentityIndex {
    entries: HashMap<String, String>,
    status: IndexStatus,
}

impl IdentityIndex {
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            entries: HashMap::new(),
            status: IndexStatus::Degraded {
                reason: reason.into(),
            },
        }
    }

    /// Queries the repository in a session of its own, released before this
    /// returns. Failures degrade to an empty index instead of aborting.
    pub async fn build<R: ContentRepository>(repo: &R, target_path: &str) -> Self {
        match Self::query(repo, target_path).await {
            Ok(entries) => {
                info!(target_path, indexed = entries.len(), "identity index built");
                Self {
                    entries,
                    status: IndexStatus::Complete,
                }
            }
            Err(err) => {
                warn!(target_path, error = %err, "identity index unavailable; treating every record as new");
                Self::degraded(err.to_string())
            }
        }
    }

    async fn query<R: ContentRepository>(
        repo: &R,
        target_path: &str,
    ) -> Result<HashMap<String, String>, RepositoryError> {
        let hits = {
            let session = repo.login().await?;
            session.find_entries(&EntryQuery::events_under(target_path)).await?
        };

        let mut entries = HashMap::new();
        for hit in hits {
            let Some(uid) = hit.uid.as_deref().and_then(non_blank) else {
                continue;
            };
            debug!(uid, path = %hit.path, "indexing entry");
            if let Some(previous) = entries.insert(uid.to_string(), hit.path.clone()) {
                warn!(uid, kept = %hit.path, dropped = %previous, "uid indexed at more than one path");
            }
        }
        Ok(entries)
    }

    pub fn lookup(&self, uid: &str) -> Option<&str> {
        let uid = non_blank(uid)?;
        self.entries.get(uid).map(String::as_str)
    }

    pub fn record(&mut self, uid: &str, path: &str) {
        if let Some(uid) = non_blank(uid) {
            self.entries.insert(uid.to_string(), path.to_string());
        }
    }

    pub fn status(&self) -> &IndexStatus {
        &self.status
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.status, IndexStatus::Degraded { .. })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sorted_entries(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(uid, path)| (uid.as_str(), path.as_str()))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone};
    use lms_core::{EventEntry, EventFields};
    use lms_storage::{FsContentRepository, FsSession};
    use tempfile::tempdir;

    struct UnreachableRepository;

    #[async_trait]
    impl ContentRepository for UnreachableRepository {
        type Session = FsSession;

        async fn login(&self) -> Result<FsSession, RepositoryError> {
            Err(RepositoryError::Login("connection refused".into()))
        }
    }

    fn fields(uid: Option<&str>) -> EventFields {
        let ts = FixedOffset::west_opt(8 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2024, 1, 15, 9, 0, 0)
            .single()
            .expect("ts");
        EventFields {
            title: Some("Event".into()),
            description: None,
            location: None,
            host: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            summary: None,
            uid: uid.map(str::to_string),
            call_to_action: None,
            start: ts,
            end: ts,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn indexes_uids_and_skips_blank_ones() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        {
            let mut session = repo.login().await.expect("login");
            session.stage_upsert(EventEntry::new("/content/events/2024/01", "a-jan-15", &fields(Some("UID1"))));
            session.stage_upsert(EventEntry::new("/content/events/2024/01", "b-jan-15", &fields(None)));
            session.stage_upsert(EventEntry::new("/content/events/2024/01", "c-jan-15", &fields(Some("  "))));
            session.stage_upsert(EventEntry::new("/content/other", "d-jan-15", &fields(Some("UID9"))));
            session.save().await.expect("save");
        }

        let index = IdentityIndex::build(&repo, "/content/events").await;
        assert_eq!(index.status(), &IndexStatus::Complete);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("UID1"), Some("/content/events/2024/01/a-jan-15"));
        assert_eq!(index.lookup(" UID1 "), Some("/content/events/2024/01/a-jan-15"));
        assert_eq!(index.lookup("UID9"), None);
        assert_eq!(index.lookup(""), None);
        assert_eq!(repo.active_sessions(), 0);
    }

    #[tokio::test]
    async fn missing_target_gives_complete_empty_index() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let index = IdentityIndex::build(&repo, "/content/events").await;
        assert!(!index.is_degraded());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn login_failure_degrades_instead_of_aborting() {
        let index = IdentityIndex::build(&UnreachableRepository, "/content/events").await;
        assert!(index.is_degraded());
        assert!(index.is_empty());
        let IndexStatus::Degraded { reason } = index.status() else {
            panic!("expected degraded status");
        };
        assert!(reason.contains("connection refused"));
    }

    #[test]
    fn recorded_entries_are_found_later_in_the_run() {
        let mut index = IdentityIndex::degraded("test");
        index.record("UID7", "/content/events/2024/01/x-jan-15");
        index.record("", "/ignored");
        assert_eq!(index.lookup("UID7"), Some("/content/events/2024/01/x-jan-15"));
        assert_eq!(index.len(), 1);
    }
}
