use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use lms_core::{NotifyError, Notifier};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

/// Hands alerts to an HTTP mail relay as `{ to, subject, body }` JSON.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building notifier client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = OutboundMessage {
            to: recipient,
            subject,
            body,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&message)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_relay_field_names() {
        let message = OutboundMessage {
            to: "ops@example.org",
            subject: "LMS importer error: cannot read data file",
            body: "timeout",
        };
        let json = serde_json::to_value(&message).expect("serialize");
        assert_eq!(json["to"], "ops@example.org");
        assert_eq!(json["subject"], "LMS importer error: cannot read data file");
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_transport_error() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/relay", Duration::from_millis(500)).expect("client");
        let err = notifier
            .send("ops@example.org", "subject", "body")
            .await
            .expect_err("nothing listens on the discard port");
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
