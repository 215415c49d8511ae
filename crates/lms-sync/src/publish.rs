use std::sync::Arc;

use lms_core::Publisher;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PublicationOutcome {
    Activated,
    Deactivated,
    SkippedManuallyDeactivated,
    Failed { error: String },
}

/// Replicates an entry after its record is saved. Failures never abort the
/// run; they come back as [`PublicationOutcome::Failed`].
#[derive(Clone)]
pub struct PublicationTrigger {
    publisher: Arc<dyn Publisher>,
    respect_manual_deactivation: bool,
}

impl PublicationTrigger {
    pub fn new(publisher: Arc<dyn Publisher>, respect_manual_deactivation: bool) -> Self {
        Self {
            publisher,
            respect_manual_deactivation,
        }
    }

    pub async fn publish(&self, path: &str, active: bool) -> PublicationOutcome {
        if !active {
            return match self.publisher.deactivate(path).await {
                Ok(()) => {
                    info!(path, "entry deactivated");
                    PublicationOutcome::Deactivated
                }
                Err(err) => {
                    warn!(path, error = %err, "deactivation failed");
                    PublicationOutcome::Failed {
                        error: err.to_string(),
                    }
                }
            };
        }

        if self.respect_manual_deactivation {
            match self.publisher.status(path).await {
                Ok(status) if status.deactivated => {
                    info!(path, "entry was deactivated by hand; not activating");
                    return PublicationOutcome::SkippedManuallyDeactivated;
                }
                Ok(_) => {}
                Err(err) => warn!(path, error = %err, "replication status unavailable; activating"),
            }
        }

        match self.publisher.activate(path).await {
            Ok(()) => {
                info!(path, "entry activated");
                PublicationOutcome::Activated
            }
            Err(err) => {
                warn!(path, error = %err, "activation failed");
                PublicationOutcome::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lms_core::{PublicationAction, PublishError, ReplicationStatus};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedPublisher {
        deactivated: bool,
        fail_status: bool,
        fail_actions: bool,
        calls: Mutex<Vec<PublicationAction>>,
    }

    #[async_trait]
    impl Publisher for ScriptedPublisher {
        async fn activate(&self, path: &str) -> Result<(), PublishError> {
            self.calls.lock().expect("lock").push(PublicationAction::Activate);
            if self.fail_actions {
                return Err(PublishError::Replication {
                    action: PublicationAction::Activate,
                    path: path.to_string(),
                    message: "agent offline".into(),
                });
            }
            Ok(())
        }

        async fn deactivate(&self, _path: &str) -> Result<(), PublishError> {
            self.calls.lock().expect("lock").push(PublicationAction::Deactivate);
            Ok(())
        }

        async fn status(&self, path: &str) -> Result<ReplicationStatus, PublishError> {
            if self.fail_status {
                return Err(PublishError::Status {
                    path: path.to_string(),
                    message: "timeout".into(),
                });
            }
            Ok(ReplicationStatus {
                deactivated: self.deactivated,
            })
        }
    }

    fn trigger(publisher: ScriptedPublisher, respect: bool) -> (PublicationTrigger, Arc<ScriptedPublisher>) {
        let publisher = Arc::new(publisher);
        (PublicationTrigger::new(publisher.clone(), respect), publisher)
    }

    #[tokio::test]
    async fn inactive_records_deactivate() {
        let (trigger, publisher) = trigger(ScriptedPublisher::default(), false);
        assert_eq!(trigger.publish("/a", false).await, PublicationOutcome::Deactivated);
        assert_eq!(*publisher.calls.lock().expect("lock"), vec![PublicationAction::Deactivate]);
    }

    #[tokio::test]
    async fn manual_deactivation_is_overridden_by_default() {
        let (trigger, publisher) = trigger(
            ScriptedPublisher {
                deactivated: true,
                ..Default::default()
            },
            false,
        );
        assert_eq!(trigger.publish("/a", true).await, PublicationOutcome::Activated);
        assert_eq!(*publisher.calls.lock().expect("lock"), vec![PublicationAction::Activate]);
    }

    #[tokio::test]
    async fn manual_deactivation_is_kept_when_respected() {
        let (trigger, publisher) = trigger(
            ScriptedPublisher {
                deactivated: true,
                ..Default::default()
            },
            true,
        );
        assert_eq!(
            trigger.publish("/a", true).await,
            PublicationOutcome::SkippedManuallyDeactivated
        );
        assert!(publisher.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn status_errors_fall_through_to_activation() {
        let (trigger, _) = trigger(
            ScriptedPublisher {
                deactivated: true,
                fail_status: true,
                ..Default::default()
            },
            true,
        );
        assert_eq!(trigger.publish("/a", true).await, PublicationOutcome::Activated);
    }

    #[tokio::test]
    async fn replication_failures_are_reported_not_raised() {
        let (trigger, _) = trigger(
            ScriptedPublisher {
                fail_actions: true,
                ..Default::default()
            },
            false,
        );
        let PublicationOutcome::Failed { error } = trigger.publish("/a", true).await else {
            panic!("expected failure outcome");
        };
        assert!(error.contains("agent offline"));
    }
}
