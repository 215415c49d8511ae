use std::sync::Arc;

use lms_core::{data_dump, FeedRecord, Notifier};
use lms_feed::{DateError, RecordError};
use lms_storage::FetchError;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRecipient {
    ContentOwner,
    Operations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub recipient: AlertRecipient,
    pub subject: String,
    pub body: String,
}

impl Alert {
    pub fn field_count(err: &RecordError) -> Self {
        Self {
            recipient: AlertRecipient::ContentOwner,
            subject: "LMS importer error: Unexpected number of fields".to_string(),
            body: data_dump(err.fields()),
        }
    }

    pub fn missing_start(record: &FeedRecord) -> Self {
        Self {
            recipient: AlertRecipient::ContentOwner,
            subject: "LMS importer error: Event contains no Start Date".to_string(),
            body: record.data_dump(),
        }
    }

    pub fn unparseable_date(err: &DateError) -> Self {
        let body = format!(
            "<p style=\"line-height: 20px; font-family: Arial, 'Helvetica Neue', Helvetica, sans-serif; font-size: 16px;\">\
             I found the following date and time strings in the data file that could not be parsed by the importer:<br>\
             Date string (must be formatted MM/dd/yyyy): {}<br>\
             Time string (must be formatted HH:mm:ss): {}</p>",
            err.date(),
            err.time()
        );
        Self {
            recipient: AlertRecipient::ContentOwner,
            subject: "LMS importer error: incorrectly formatted date in data file".to_string(),
            body,
        }
    }

    pub fn malformed_feed_url(err: &FetchError) -> Self {
        Self {
            recipient: AlertRecipient::Operations,
            subject: "LMS importer error: malformed URL for data file".to_string(),
            body: err.to_string(),
        }
    }

    pub fn feed_unreadable(err: &FetchError) -> Self {
        Self {
            recipient: AlertRecipient::Operations,
            subject: "LMS importer error: cannot read data file".to_string(),
            body: err.to_string(),
        }
    }
}

/// Logs every alert and, when a channel is configured, forwards it.
/// Never fails: delivery problems are logged and dropped.
#[derive(Clone)]
pub struct AlertSink {
    notifier: Option<Arc<dyn Notifier>>,
    content_owner: String,
    operations: String,
}

impl AlertSink {
    pub fn new(content_owner: impl Into<String>, operations: impl Into<String>) -> Self {
        Self {
            notifier: None,
            content_owner: content_owner.into(),
            operations: operations.into(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn address(&self, recipient: AlertRecipient) -> &str {
        match recipient {
            AlertRecipient::ContentOwner => &self.content_owner,
            AlertRecipient::Operations => &self.operations,
        }
    }

    pub async fn emit(&self, alert: &Alert) {
        let to = self.address(alert.recipient);
        error!(to, subject = %alert.subject, body = %alert.body, "import alert");

        let Some(notifier) = &self.notifier else {
            return;
        };
        if let Err(err) = notifier.send(to, &alert.subject, &alert.body).await {
            warn!(to, subject = %alert.subject, error = %err, "alert delivery failed");
        }
    }
}

impl std::fmt::Debug for AlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertSink")
            .field("notifier", &self.notifier.is_some())
            .field("content_owner", &self.content_owner)
            .field("operations", &self.operations)
            .finish()
    }
}
