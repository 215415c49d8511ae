//! Import pipeline: identity index, feed fetch, record validation, upsert,
//! publication and alerting.

mod alert;
mod config;
mod index;
mod publish;
mod report;
mod rules;
mod schedule;
mod slug;
mod upsert;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lms_core::{ContentRepository, FeedRecord, Notifier, Publisher};
use lms_feed::{records, DateResolver, RecordError, ScheduleError};
use lms_storage::{
    FeedFetcher, FetchError, FsContentRepository, FsPublisher, HttpClientConfig, WebhookNotifier,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use alert::{Alert, AlertRecipient, AlertSink};
pub use config::{
    ImporterConfig, TagMissPolicy, UpdateStrategy, DEFAULT_SCHEDULE, DEFAULT_TARGET_PATH,
};
pub use index::{IdentityIndex, IndexStatus};
pub use publish::{PublicationOutcome, PublicationTrigger};
pub use report::{brief_markdown, write_run_report};
pub use rules::{ImportRules, VendorLookup, VendorTagRule};
pub use schedule::{build_scheduler, RunGuard, RunPermit};
pub use slug::{destination_folder, entry_name, normalize, truncate_title};
pub use upsert::{UpsertEngine, UpsertError, Upserted};

pub const CRATE_NAME: &str = "lms-sync";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    FieldCount { found: usize },
    MissingStart,
    UnparseableDate { date: String, time: String },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldCount { found } => {
                write!(f, "expected {} fields, found {found}", lms_core::FIELD_COUNT)
            }
            Self::MissingStart => f.write_str("no start date"),
            Self::UnparseableDate { date, time } => write!(f, "unparseable date {date:?} {time:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Created { uid: String, path: String },
    Updated { uid: String, path: String },
    Replaced { uid: String, previous_path: String, path: String },
    SkippedCollision { uid: String, path: String },
    Rejected { reason: RejectReason },
    Failed { uid: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub line: usize,
    pub outcome: RecordOutcome,
    pub publication: Option<PublicationOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub feed_url: String,
    pub feed_bytes: usize,
    pub feed_sha256: String,
    pub index_status: IndexStatus,
    pub indexed: usize,
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub collisions: usize,
    pub rejected: usize,
    pub failed: usize,
    pub activated: usize,
    pub deactivated: usize,
    pub publication_failures: usize,
    pub records: Vec<RecordReport>,
    pub reports_dir: Option<String>,
}

impl RunSummary {
    pub fn summary_line(&self) -> String {
        format!(
            "import {}: created={} updated={} replaced={} collisions={} rejected={} failed={} activated={} deactivated={} index={}",
            self.run_id,
            self.created,
            self.updated,
            self.replaced,
            self.collisions,
            self.rejected,
            self.failed,
            self.activated,
            self.deactivated,
            self.index_status
        )
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("malformed feed URL: {0}")]
    MalformedFeedUrl(#[source] FetchError),
    #[error("feed unreadable: {0}")]
    FeedUnreadable(#[source] FetchError),
}

pub struct Importer<R: ContentRepository> {
    config: ImporterConfig,
    repository: R,
    fetcher: FeedFetcher,
    engine: UpsertEngine,
    publication: PublicationTrigger,
    alerts: AlertSink,
}

impl<R: ContentRepository> Importer<R> {
    pub fn new(
        config: ImporterConfig,
        rules: ImportRules,
        repository: R,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self> {
        let fetcher = FeedFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            max_body_bytes: config.max_feed_bytes,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let engine = UpsertEngine::new(
            config.target_path.clone(),
            config.update_strategy,
            config.tag_miss_policy,
            Arc::new(rules),
            DateResolver::new(config.timezone),
        );
        let publication = PublicationTrigger::new(publisher, config.respect_manual_deactivation);
        let alerts = AlertSink::new(
            config.content_owner_contact.clone(),
            config.operations_contact.clone(),
        );
        Ok(Self {
            config,
            repository,
            fetcher,
            engine,
            publication,
            alerts,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.alerts = self.alerts.with_notifier(notifier);
        self
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn config(&self) -> &ImporterConfig {
        &self.config
    }

    pub async fn build_index(&self) -> IdentityIndex {
        IdentityIndex::build(&self.repository, &self.config.target_path).await
    }

    pub async fn run_once(&self) -> Result<RunSummary, ImportError> {
        let run_id = Uuid::new_v4();
        self.run(run_id)
            .instrument(info_span!("import_run", %run_id))
            .await
    }

    async fn run(&self, run_id: Uuid) -> Result<RunSummary, ImportError> {
        let started_at = Utc::now();
        let mut index = self.build_index().await;
        let indexed = index.len();

        let feed = match self.fetcher.fetch(&self.config.feed_url).await {
            Ok(feed) => feed,
            Err(err) if err.is_invalid_url() => {
                self.alerts.emit(&Alert::malformed_feed_url(&err)).await;
                return Err(ImportError::MalformedFeedUrl(err));
            }
            Err(err) => {
                self.alerts.emit(&Alert::feed_unreadable(&err)).await;
                return Err(ImportError::FeedUnreadable(err));
            }
        };
        info!(url = %feed.url, bytes = feed.byte_size, sha256 = %feed.sha256, "feed fetched");

        let mut reports = Vec::new();
        for (line, parsed) in records(&feed.text) {
            let span = info_span!("record", line);
            let report = self.process(line, parsed, &mut index).instrument(span).await;
            reports.push(report);
        }

        let mut summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            feed_url: feed.url.clone(),
            feed_bytes: feed.byte_size,
            feed_sha256: feed.sha256.clone(),
            index_status: index.status().clone(),
            indexed,
            created: tally(&reports, |r| matches!(r.outcome, RecordOutcome::Created { .. })),
            updated: tally(&reports, |r| matches!(r.outcome, RecordOutcome::Updated { .. })),
            replaced: tally(&reports, |r| matches!(r.outcome, RecordOutcome::Replaced { .. })),
            collisions: tally(&reports, |r| matches!(r.outcome, RecordOutcome::SkippedCollision { .. })),
            rejected: tally(&reports, |r| matches!(r.outcome, RecordOutcome::Rejected { .. })),
            failed: tally(&reports, |r| matches!(r.outcome, RecordOutcome::Failed { .. })),
            activated: tally(&reports, |r| matches!(r.publication, Some(PublicationOutcome::Activated))),
            deactivated: tally(&reports, |r| matches!(r.publication, Some(PublicationOutcome::Deactivated))),
            publication_failures: tally(&reports, |r| {
                matches!(r.publication, Some(PublicationOutcome::Failed { .. }))
            }),
            records: Vec::new(),
            reports_dir: None,
        };
        summary.records = reports;

        if let Some(dir) = &self.config.reports_dir {
            match write_run_report(dir, &summary).await {
                Ok(path) => summary.reports_dir = Some(path.display().to_string()),
                Err(err) => warn!(error = %format!("{err:#}"), "run report not written"),
            }
        }

        info!("{}", summary.summary_line());
        Ok(summary)
    }

    async fn process(
        &self,
        line: usize,
        parsed: Result<FeedRecord, RecordError>,
        index: &mut IdentityIndex,
    ) -> RecordReport {
        let record = match parsed {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "record rejected");
                self.alerts.emit(&Alert::field_count(&err)).await;
                return RecordReport {
                    line,
                    outcome: RecordOutcome::Rejected {
                        reason: RejectReason::FieldCount {
                            found: err.fields().len(),
                        },
                    },
                    publication: None,
                };
            }
        };

        let uid = record.uid.trim().to_string();
        let upserted = match self.engine.upsert(&self.repository, &record, index).await {
            Ok(upserted) => upserted,
            Err(UpsertError::Schedule(ScheduleError::MissingStart)) => {
                warn!(uid = %uid, "record has no start date");
                self.alerts.emit(&Alert::missing_start(&record)).await;
                return RecordReport {
                    line,
                    outcome: RecordOutcome::Rejected {
                        reason: RejectReason::MissingStart,
                    },
                    publication: None,
                };
            }
            Err(UpsertError::Schedule(ScheduleError::Date(err))) => {
                warn!(uid = %uid, error = %err, "record date rejected");
                self.alerts.emit(&Alert::unparseable_date(&err)).await;
                return RecordReport {
                    line,
                    outcome: RecordOutcome::Rejected {
                        reason: RejectReason::UnparseableDate {
                            date: err.date().to_string(),
                            time: err.time().to_string(),
                        },
                    },
                    publication: None,
                };
            }
            Err(err) => {
                error!(uid = %uid, error = %err, data = %record.data_dump(), "record not written");
                return RecordReport {
                    line,
                    outcome: RecordOutcome::Failed {
                        uid,
                        error: err.to_string(),
                    },
                    publication: None,
                };
            }
        };

        let publication = match upserted.written_path() {
            Some(path) => Some(self.publication.publish(path, record.is_active()).await),
            None => None,
        };

        let outcome = match upserted {
            Upserted::Created { path } => RecordOutcome::Created { uid, path },
            Upserted::Updated { path } => RecordOutcome::Updated { uid, path },
            Upserted::Replaced {
                previous_path,
                path,
            } => RecordOutcome::Replaced {
                uid,
                previous_path,
                path,
            },
            Upserted::Collision { path } => RecordOutcome::SkippedCollision { uid, path },
        };

        RecordReport {
            line,
            outcome,
            publication,
        }
    }
}

fn tally(reports: &[RecordReport], pred: impl Fn(&RecordReport) -> bool) -> usize {
    reports.iter().filter(|r| pred(r)).count()
}

pub fn importer_from_config(config: ImporterConfig) -> Result<Importer<FsContentRepository>> {
    let rules = ImportRules::from_path(&config.rules_path)?;
    let repository = FsContentRepository::new(config.repository_root.clone());
    let publisher = Arc::new(FsPublisher::new(config.repository_root.clone()));
    let webhook = config.alert_webhook_url.clone();
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let importer = Importer::new(config, rules, repository, publisher)?;
    Ok(match webhook {
        Some(url) => importer.with_notifier(Arc::new(
            WebhookNotifier::new(url, timeout).context("building alert notifier")?,
        )),
        None => importer,
    })
}

pub async fn run_import_once_from_env() -> Result<RunSummary> {
    let config = ImporterConfig::from_env()?;
    let importer = importer_from_config(config)?;
    Ok(importer.run_once().await?)
}
