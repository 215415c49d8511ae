use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TARGET_PATH: &str = "/content/events/lms-import";
pub const DEFAULT_SCHEDULE: &str = "0 0 4 * * *";

/// How an UPDATE record reaches its existing entry. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStrategy {
    #[default]
    InPlace,
    Replace,
}

impl FromStr for UpdateStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in-place" | "in_place" | "inplace" => Ok(Self::InPlace),
            "replace" => Ok(Self::Replace),
            other => Err(anyhow!("unknown update strategy {other:?} (expected in-place or replace)")),
        }
    }
}

/// Whether an event that ends up without a category or department tag is
/// worth a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagMissPolicy {
    #[default]
    Warn,
    Ignore,
}

impl FromStr for TagMissPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "ignore" => Ok(Self::Ignore),
            other => Err(anyhow!("unknown tag miss policy {other:?} (expected warn or ignore)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImporterConfig {
    pub target_path: String,
    pub feed_url: String,
    pub repository_root: PathBuf,
    pub timezone: Tz,
    pub schedule: String,
    pub scheduler_enabled: bool,
    pub allow_concurrent: bool,
    pub update_strategy: UpdateStrategy,
    pub tag_miss_policy: TagMissPolicy,
    pub respect_manual_deactivation: bool,
    pub rules_path: PathBuf,
    pub alert_webhook_url: Option<String>,
    pub content_owner_contact: String,
    pub operations_contact: String,
    pub http_timeout_secs: u64,
    pub max_feed_bytes: usize,
    pub user_agent: String,
    pub reports_dir: Option<PathBuf>,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            target_path: DEFAULT_TARGET_PATH.to_string(),
            feed_url: String::new(),
            repository_root: PathBuf::from("./repository"),
            timezone: chrono_tz::America::Los_Angeles,
            schedule: DEFAULT_SCHEDULE.to_string(),
            scheduler_enabled: false,
            allow_concurrent: false,
            update_strategy: UpdateStrategy::default(),
            tag_miss_policy: TagMissPolicy::default(),
            respect_manual_deactivation: false,
            rules_path: PathBuf::from("./config/import_rules.yaml"),
            alert_webhook_url: None,
            content_owner_contact: "training-admin@example.org".to_string(),
            operations_contact: "web-ops@example.org".to_string(),
            http_timeout_secs: 30,
            max_feed_bytes: 16 * 1024 * 1024,
            user_agent: "lms-importer/0.1".to_string(),
            reports_dir: None,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .trim()
        .parse()
        .with_context(|| format!("parsing {key} {value:?}"))?;
    if parsed == T::default() {
        bail!("{key} must be greater than zero");
    }
    Ok(parsed)
}

impl ImporterConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let timezone = match var("LMS_TIMEZONE") {
            Some(name) => name
                .trim()
                .parse::<Tz>()
                .map_err(|err| anyhow!("LMS_TIMEZONE {name:?}: {err}"))?,
            None => defaults.timezone,
        };
        let update_strategy = match var("LMS_UPDATE_STRATEGY") {
            Some(v) => v.parse().context("parsing LMS_UPDATE_STRATEGY")?,
            None => defaults.update_strategy,
        };
        let tag_miss_policy = match var("LMS_TAG_MISS_POLICY") {
            Some(v) => v.parse().context("parsing LMS_TAG_MISS_POLICY")?,
            None => defaults.tag_miss_policy,
        };
        let http_timeout_secs = match var("LMS_HTTP_TIMEOUT_SECS") {
            Some(v) => parse_positive("LMS_HTTP_TIMEOUT_SECS", &v)?,
            None => defaults.http_timeout_secs,
        };
        let max_feed_bytes = match var("LMS_MAX_FEED_BYTES") {
            Some(v) => parse_positive("LMS_MAX_FEED_BYTES", &v)?,
            None => defaults.max_feed_bytes,
        };

        Ok(Self {
            // A blank target falls back to the default location.
            target_path: var("LMS_TARGET_PATH")
                .map(|v| v.trim().to_string())
                .unwrap_or(defaults.target_path),
            feed_url: var("LMS_FEED_URL").unwrap_or(defaults.feed_url),
            repository_root: var("LMS_REPOSITORY_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.repository_root),
            timezone,
            schedule: var("LMS_SCHEDULE").unwrap_or(defaults.schedule),
            scheduler_enabled: var("LMS_SCHEDULER_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.scheduler_enabled),
            allow_concurrent: var("LMS_ALLOW_CONCURRENT")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.allow_concurrent),
            update_strategy,
            tag_miss_policy,
            respect_manual_deactivation: var("LMS_RESPECT_MANUAL_DEACTIVATION")
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.respect_manual_deactivation),
            rules_path: var("LMS_RULES_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.rules_path),
            alert_webhook_url: var("LMS_ALERT_WEBHOOK_URL"),
            content_owner_contact: var("LMS_CONTENT_OWNER_CONTACT")
                .unwrap_or(defaults.content_owner_contact),
            operations_contact: var("LMS_OPERATIONS_CONTACT").unwrap_or(defaults.operations_contact),
            http_timeout_secs,
            max_feed_bytes,
            user_agent: var("LMS_USER_AGENT").unwrap_or(defaults.user_agent),
            reports_dir: var("LMS_REPORTS_DIR").map(PathBuf::from),
        })
    }
}
