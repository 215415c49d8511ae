use std::sync::Arc;

use lms_core::{
    join_path, non_blank, CallToAction, ContentRepository, EventEntry, EventFields, FeedRecord,
    RepositoryError, RepositorySession, CALL_TO_ACTION_TEXT,
};
use lms_feed::{DateResolver, EventSchedule, ScheduleError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{TagMissPolicy, UpdateStrategy};
use crate::index::IdentityIndex;
use crate::rules::{ImportRules, VendorLookup};
use crate::slug::{destination_folder, entry_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted {
    Created { path: String },
    Updated { path: String },
    Replaced { previous_path: String, path: String },
    Collision { path: String },
}

impl Upserted {
    pub fn written_path(&self) -> Option<&str> {
        match self {
            Self::Created { path } | Self::Updated { path } | Self::Replaced { path, .. } => {
                Some(path.as_str())
            }
            Self::Collision { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum UpsertError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("uid {uid} is indexed at {path} but no entry exists there")]
    IndexInconsistent { uid: String, path: String },
}

/// Turns one validated feed record into a created, updated or relocated entry.
#[derive(Debug, Clone)]
pub struct UpsertEngine {
    target_path: String,
    strategy: UpdateStrategy,
    tag_miss_policy: TagMissPolicy,
    rules: Arc<ImportRules>,
    dates: DateResolver,
}

impl UpsertEngine {
    pub fn new(
        target_path: impl Into<String>,
        strategy: UpdateStrategy,
        tag_miss_policy: TagMissPolicy,
        rules: Arc<ImportRules>,
        dates: DateResolver,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            strategy,
            tag_miss_policy,
            rules,
            dates,
        }
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    pub fn strategy(&self) -> UpdateStrategy {
        self.strategy
    }

    /// Resolves the schedule, then writes through a session opened for this
    /// record alone. Staged changes reach the repository in a single `save`.
    pub async fn upsert<R: ContentRepository>(
        &self,
        repo: &R,
        record: &FeedRecord,
        index: &mut IdentityIndex,
    ) -> Result<Upserted, UpsertError> {
        let schedule = self.dates.resolve_schedule(record)?;
        let uid = record.uid.trim();
        let folder = destination_folder(&self.target_path, &schedule.start);
        let name = entry_name(&record.title, &schedule.start);
        let destination = join_path(&folder, &name);

        let mut session = repo.login().await?;
        let tags = self.resolve_tags(&session, record).await?;
        let fields = self.fields_for(record, &schedule, tags);

        let Some(existing) = index.lookup(uid).map(str::to_string) else {
            if session.exists(&destination).await? {
                warn!(uid, path = %destination, "destination already occupied; record skipped");
                return Ok(Upserted::Collision { path: destination });
            }
            session.stage_upsert(EventEntry::new(&folder, &name, &fields));
            session.save().await?;
            index.record(uid, &destination);
            info!(uid, path = %destination, "event created");
            return Ok(Upserted::Created { path: destination });
        };

        match self.strategy {
            UpdateStrategy::InPlace => {
                let Some(mut entry) = session.get(&existing).await? else {
                    return Err(UpsertError::IndexInconsistent {
                        uid: uid.to_string(),
                        path: existing,
                    });
                };
                entry.apply(&fields);
                session.stage_upsert(entry);
                session.save().await?;
                info!(uid, path = %existing, "event updated");
                Ok(Upserted::Updated { path: existing })
            }
            UpdateStrategy::Replace => {
                if destination != existing && session.exists(&destination).await? {
                    warn!(uid, path = %destination, previous = %existing, "destination already occupied; record skipped");
                    return Ok(Upserted::Collision { path: destination });
                }
                session.stage_delete(&existing);
                session.stage_upsert(EventEntry::new(&folder, &name, &fields));
                session.save().await?;
                index.record(uid, &destination);
                info!(uid, path = %destination, previous = %existing, "event replaced");
                Ok(Upserted::Replaced {
                    previous_path: existing,
                    path: destination,
                })
            }
        }
    }

    /// The field set a record contributes. Blank columns stay `None` so an
    /// update never clears a stored value.
    pub fn fields_for(
        &self,
        record: &FeedRecord,
        schedule: &EventSchedule,
        tags: Vec<String>,
    ) -> EventFields {
        let owned = |value: &str| non_blank(value).map(str::to_string);

        let description = match self.rules.description_suffix() {
            Some(suffix) => Some(format!(
                "{}{suffix}",
                non_blank(&record.description).unwrap_or_default()
            )),
            None => owned(&record.description),
        };

        EventFields {
            title: Some(record.title.trim().to_string()),
            description,
            location: owned(&record.location),
            host: owned(&record.host),
            contact_name: owned(&record.contact_name),
            contact_email: owned(&record.contact_email),
            contact_phone: owned(&record.contact_phone),
            summary: owned(&record.summary),
            uid: owned(&record.uid),
            call_to_action: non_blank(&record.deep_link).map(|url| CallToAction {
                text: CALL_TO_ACTION_TEXT.to_string(),
                url: url.to_string(),
            }),
            start: schedule.start,
            end: schedule.end,
            tags,
        }
    }

    pub async fn resolve_tags<S: RepositorySession>(
        &self,
        session: &S,
        record: &FeedRecord,
    ) -> Result<Vec<String>, RepositoryError> {
        let uid = record.uid.trim();
        let mut tags = Vec::new();

        match self.rules.category_tag.as_deref().and_then(non_blank) {
            Some(id) => match session.resolve_tag(id).await? {
                Some(tag) => tags.push(tag),
                None => self.tag_missing(uid, &format!("category tag {id} does not resolve")),
            },
            None => self.tag_missing(uid, "no category tag configured"),
        }

        match self.rules.vendor_tag(&record.host) {
            VendorLookup::Tagged(id) => match session.resolve_tag(id).await? {
                Some(tag) if !tags.contains(&tag) => tags.push(tag),
                Some(_) => {}
                None => self.tag_missing(uid, &format!("department tag {id} does not resolve")),
            },
            VendorLookup::Untagged => {
                debug!(uid, vendor = record.host.trim(), "vendor carries no department tag");
            }
            VendorLookup::Unknown => self.tag_missing(
                uid,
                &format!("no department tag for vendor {:?}", record.host.trim()),
            ),
        }

        Ok(tags)
    }

    fn tag_missing(&self, uid: &str, reason: &str) {
        match self.tag_miss_policy {
            TagMissPolicy::Warn => warn!(uid, reason, "event imported without tag"),
            TagMissPolicy::Ignore => debug!(uid, reason, "event imported without tag"),
        }
    }
}
