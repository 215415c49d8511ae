use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::{
    ContentRepository, EntryQuery, EventEntry, PublicationAction, PublishError, Publisher,
    ReplicationStatus, RepositoryError, RepositorySession,
};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const ENTRY_FILE: &str = ".entry.json";
const REPLICATION_FILE: &str = ".replication.json";

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> RepositoryError + '_ {
    move |source| RepositoryError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Maps `/content/a/b` onto `{root}/content/a/b`, refusing segments that
/// could escape the root.
fn entry_dir(root: &Path, repo_path: &str) -> Result<PathBuf, RepositoryError> {
    let trimmed = repo_path.trim_matches('/');
    if trimmed.is_empty() {
        return Err(RepositoryError::InvalidPath(repo_path.to_string()));
    }
    let mut dir = root.to_path_buf();
    for segment in trimmed.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\') {
            return Err(RepositoryError::InvalidPath(repo_path.to_string()));
        }
        dir.push(segment);
    }
    Ok(dir)
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, RepositoryError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_error(path)(err)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| RepositoryError::Corrupt {
            path: path.display().to_string(),
            message: err.to_string(),
        })
}

/// Writes through a temp file in the destination directory, then renames it
/// into place so readers never observe a half-written file.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RepositoryError> {
    let parent = path
        .parent()
        .ok_or_else(|| RepositoryError::InvalidPath(path.display().to_string()))?;
    fs::create_dir_all(parent).await.map_err(io_error(parent))?;

    let bytes = serde_json::to_vec_pretty(value).map_err(|err| RepositoryError::Corrupt {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(io_error(&temp_path))?;
    file.write_all(&bytes).await.map_err(io_error(&temp_path))?;
    file.flush().await.map_err(io_error(&temp_path))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_error(path)(err));
    }
    Ok(())
}

/// Content repository stored as one JSON document per entry directory.
#[derive(Debug, Clone)]
pub struct FsContentRepository {
    root: PathBuf,
    sessions: Arc<AtomicUsize>,
}

impl FsContentRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sessions handed out by `login` that have not been dropped yet.
    pub fn active_sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentRepository for FsContentRepository {
    type Session = FsSession;

    async fn login(&self) -> Result<FsSession, RepositoryError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|err| RepositoryError::Login(format!("{}: {err}", self.root.display())))?;
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let id = Uuid::new_v4();
        debug!(session = %id, "repository session opened");
        Ok(FsSession {
            id,
            root: self.root.clone(),
            pending: Vec::new(),
            sessions: Arc::clone(&self.sessions),
        })
    }
}

#[derive(Debug)]
enum PendingChange {
    Upsert(EventEntry),
    Delete(String),
}

#[derive(Debug)]
pub struct FsSession {
    id: Uuid,
    root: PathBuf,
    pending: Vec<PendingChange>,
    sessions: Arc<AtomicUsize>,
}

impl FsSession {
    fn staged(&self, path: &str) -> Option<Option<&EventEntry>> {
        self.pending.iter().rev().find_map(|change| match change {
            PendingChange::Upsert(entry) if entry.path == path => Some(Some(entry)),
            PendingChange::Delete(deleted) if deleted == path => Some(None),
            _ => None,
        })
    }

    async fn read_entry(&self, path: &str) -> Result<Option<EventEntry>, RepositoryError> {
        let file = entry_dir(&self.root, path)?.join(ENTRY_FILE);
        read_json(&file).await
    }
}

impl Drop for FsSession {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(session = %self.id, discarded = self.pending.len(), "session released with unsaved changes");
        }
        self.sessions.fetch_sub(1, Ordering::SeqCst);
        debug!(session = %self.id, "repository session released");
    }
}

#[async_trait]
impl RepositorySession for FsSession {
    async fn find_entries(&self, query: &EntryQuery) -> Result<Vec<EventEntry>, RepositoryError> {
        let base = entry_dir(&self.root, &query.root)?;
        let mut found = Vec::new();
        let mut stack = vec![base];

        while let Some(dir) = stack.pop() {
            let mut listing = match fs::read_dir(&dir).await {
                Ok(listing) => listing,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_error(&dir)(err)),
            };
            while let Some(item) = listing.next_entry().await.map_err(io_error(&dir))? {
                let item_path = item.path();
                let file_type = item.file_type().await.map_err(io_error(&item_path))?;
                if file_type.is_dir() {
                    stack.push(item_path);
                } else if item.file_name() == ENTRY_FILE {
                    if let Some(entry) = read_json::<EventEntry>(&item_path).await? {
                        if entry.template == query.template {
                            found.push(entry);
                        }
                    }
                }
            }
        }

        found.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(found)
    }

    async fn get(&self, path: &str) -> Result<Option<EventEntry>, RepositoryError> {
        if let Some(staged) = self.staged(path) {
            return Ok(staged.cloned());
        }
        self.read_entry(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, RepositoryError> {
        Ok(self.get(path).await?.is_some())
    }

    async fn resolve_tag(&self, tag_id: &str) -> Result<Option<String>, RepositoryError> {
        let tag_id = tag_id.trim();
        let resolved = match tag_id.split_once(':') {
            Some((namespace, name))
                if !namespace.is_empty()
                    && !name.is_empty()
                    && !tag_id.chars().any(char::is_whitespace) =>
            {
                Some(tag_id.to_string())
            }
            _ => None,
        };
        Ok(resolved)
    }

    fn stage_upsert(&mut self, entry: EventEntry) {
        self.pending.push(PendingChange::Upsert(entry));
    }

    fn stage_delete(&mut self, path: &str) {
        self.pending.push(PendingChange::Delete(path.to_string()));
    }

    async fn save(&mut self) -> Result<(), RepositoryError> {
        for change in std::mem::take(&mut self.pending) {
            match change {
                PendingChange::Upsert(entry) => {
                    let file = entry_dir(&self.root, &entry.path)?.join(ENTRY_FILE);
                    write_json_atomic(&file, &entry).await?;
                    debug!(session = %self.id, path = %entry.path, "entry written");
                }
                PendingChange::Delete(path) => {
                    let dir = entry_dir(&self.root, &path)?;
                    match fs::remove_dir_all(&dir).await {
                        Ok(()) => debug!(session = %self.id, %path, "entry deleted"),
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                            debug!(session = %self.id, %path, "delete of missing entry ignored")
                        }
                        Err(err) => return Err(io_error(&dir)(err)),
                    }
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRecord {
    pub action: PublicationAction,
    pub at: DateTime<Utc>,
}

/// Records publication state next to each entry.
#[derive(Debug, Clone)]
pub struct FsPublisher {
    root: PathBuf,
}

impl FsPublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn last_action(&self, path: &str) -> Result<Option<ReplicationRecord>, RepositoryError> {
        let file = entry_dir(&self.root, path)?.join(REPLICATION_FILE);
        read_json(&file).await
    }

    async fn replicate(&self, action: PublicationAction, path: &str) -> Result<(), PublishError> {
        let failed = |message: String| PublishError::Replication {
            action,
            path: path.to_string(),
            message,
        };
        let dir = entry_dir(&self.root, path).map_err(|err| failed(err.to_string()))?;
        let exists = fs::try_exists(dir.join(ENTRY_FILE))
            .await
            .map_err(|err| failed(err.to_string()))?;
        if !exists {
            return Err(failed("no entry to replicate".to_string()));
        }

        let record = ReplicationRecord {
            action,
            at: Utc::now(),
        };
        write_json_atomic(&dir.join(REPLICATION_FILE), &record)
            .await
            .map_err(|err| failed(err.to_string()))
    }
}

#[async_trait]
impl Publisher for FsPublisher {
    async fn activate(&self, path: &str) -> Result<(), PublishError> {
        self.replicate(PublicationAction::Activate, path).await
    }

    async fn deactivate(&self, path: &str) -> Result<(), PublishError> {
        self.replicate(PublicationAction::Deactivate, path).await
    }

    async fn status(&self, path: &str) -> Result<ReplicationStatus, PublishError> {
        let record = self
            .last_action(path)
            .await
            .map_err(|err| PublishError::Status {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        Ok(ReplicationStatus {
            deactivated: matches!(
                record,
                Some(ReplicationRecord {
                    action: PublicationAction::Deactivate,
                    ..
                })
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};
    use lms_core::{EventFields, EVENT_TEMPLATE};
    use tempfile::tempdir;

    fn fields(uid: &str) -> EventFields {
        let ts = FixedOffset::west_opt(8 * 3600)
            .expect("offset")
            .with_ymd_and_hms(2024, 1, 15, 9, 0, 0)
            .single()
            .expect("ts");
        EventFields {
            title: Some("Safety Training".into()),
            description: None,
            location: None,
            host: None,
            contact_name: None,
            contact_email: None,
            contact_phone: None,
            summary: None,
            uid: Some(uid.into()),
            call_to_action: None,
            start: ts,
            end: ts,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn saved_entries_are_visible_to_new_sessions() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());

        {
            let mut session = repo.login().await.expect("login");
            let entry = EventEntry::new("/content/events/2024/01", "safety-jan-15", &fields("UID1"));
            session.stage_upsert(entry);
            assert!(session.exists("/content/events/2024/01/safety-jan-15").await.expect("exists"));
            session.save().await.expect("save");
        }

        let session = repo.login().await.expect("login");
        let entry = session
            .get("/content/events/2024/01/safety-jan-15")
            .await
            .expect("get")
            .expect("entry present");
        assert_eq!(entry.uid.as_deref(), Some("UID1"));
        assert!(dir
            .path()
            .join("content/events/2024/01/safety-jan-15/.entry.json")
            .exists());
    }

    #[tokio::test]
    async fn dropped_sessions_discard_changes_and_release() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());

        let mut session = repo.login().await.expect("login");
        assert_eq!(repo.active_sessions(), 1);
        session.stage_upsert(EventEntry::new("/content/events", "x-jan-15", &fields("UID1")));
        drop(session);

        assert_eq!(repo.active_sessions(), 0);
        let session = repo.login().await.expect("login");
        assert!(!session.exists("/content/events/x-jan-15").await.expect("exists"));
    }

    #[tokio::test]
    async fn find_entries_filters_by_root_and_template() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let mut session = repo.login().await.expect("login");

        session.stage_upsert(EventEntry::new("/content/events/2024/01", "a-jan-15", &fields("A")));
        session.stage_upsert(EventEntry::new("/content/events/2024/02", "b-feb-01", &fields("B")));
        let mut other = EventEntry::new("/content/events/2024/02", "page-feb-01", &fields("C"));
        other.template = "/apps/site/templates/page".into();
        session.stage_upsert(other);
        session.stage_upsert(EventEntry::new("/content/elsewhere", "d-jan-15", &fields("D")));
        session.save().await.expect("save");

        let found = session
            .find_entries(&EntryQuery::events_under("/content/events"))
            .await
            .expect("query");
        let uids: Vec<_> = found.iter().filter_map(|e| e.uid.as_deref()).collect();
        assert_eq!(uids, vec!["A", "B"]);
        assert!(found.iter().all(|e| e.template == EVENT_TEMPLATE));

        let none = session
            .find_entries(&EntryQuery::events_under("/content/missing"))
            .await
            .expect("query");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn delete_tolerates_missing_entries() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let mut session = repo.login().await.expect("login");

        session.stage_upsert(EventEntry::new("/content/events", "a-jan-15", &fields("A")));
        session.save().await.expect("save");

        session.stage_delete("/content/events/a-jan-15");
        session.stage_delete("/content/events/never-existed");
        assert!(!session.exists("/content/events/a-jan-15").await.expect("exists"));
        session.save().await.expect("save");
        assert!(session.get("/content/events/a-jan-15").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let session = repo.login().await.expect("login");
        for path in ["/", "/content/../etc", "/content//x", "/content/./x"] {
            let err = session.get(path).await.expect_err("invalid path");
            assert!(matches!(err, RepositoryError::InvalidPath(_)), "{path}");
        }
    }

    #[tokio::test]
    async fn tag_ids_need_a_namespace() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let session = repo.login().await.expect("login");

        let resolved = session.resolve_tag("web-depts:AD/AD0303").await.expect("resolve");
        assert_eq!(resolved.as_deref(), Some("web-depts:AD/AD0303"));
        for bad in ["", "training", ":x", "ns:", "ns:has space"] {
            assert!(session.resolve_tag(bad).await.expect("resolve").is_none(), "{bad}");
        }
    }

    #[tokio::test]
    async fn publisher_tracks_last_action() {
        let dir = tempdir().expect("tempdir");
        let repo = FsContentRepository::new(dir.path());
        let publisher = FsPublisher::new(dir.path());
        let path = "/content/events/a-jan-15";

        assert!(publisher.activate(path).await.is_err());

        let mut session = repo.login().await.expect("login");
        session.stage_upsert(EventEntry::new("/content/events", "a-jan-15", &fields("A")));
        session.save().await.expect("save");

        publisher.activate(path).await.expect("activate");
        assert!(!publisher.status(path).await.expect("status").deactivated);

        publisher.deactivate(path).await.expect("deactivate");
        assert!(publisher.status(path).await.expect("status").deactivated);
        let last = publisher.last_action(path).await.expect("read").expect("record");
        assert_eq!(last.action, PublicationAction::Deactivate);
    }
}
