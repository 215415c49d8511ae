use std::sync::Arc;

use anyhow::{Context, Result};
use lms_core::ContentRepository;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::Importer;

#[derive(Debug)]
pub struct RunPermit {
    _guard: Option<OwnedMutexGuard<()>>,
}

/// Keeps scheduled runs from overlapping unless concurrency is allowed.
#[derive(Debug, Clone)]
pub struct RunGuard {
    lock: Option<Arc<Mutex<()>>>,
}

impl RunGuard {
    pub fn new(allow_concurrent: bool) -> Self {
        Self {
            lock: (!allow_concurrent).then(|| Arc::new(Mutex::new(()))),
        }
    }

    pub fn try_begin(&self) -> Option<RunPermit> {
        match &self.lock {
            None => Some(RunPermit { _guard: None }),
            Some(lock) => lock
                .clone()
                .try_lock_owned()
                .ok()
                .map(|guard| RunPermit {
                    _guard: Some(guard),
                }),
        }
    }
}

/// One cron job that runs the importer on `schedule` (six fields, seconds first).
pub async fn build_scheduler<R>(
    importer: Arc<Importer<R>>,
    schedule: &str,
    allow_concurrent: bool,
) -> Result<JobScheduler>
where
    R: ContentRepository + 'static,
{
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let guard = RunGuard::new(allow_concurrent);

    let job = Job::new_async(schedule, move |_uuid, _l| {
        let importer = importer.clone();
        let guard = guard.clone();
        Box::pin(async move {
            let Some(_permit) = guard.try_begin() else {
                warn!("previous import still running; skipping this tick");
                return;
            };
            match importer.run_once().await {
                Ok(summary) => info!(run_id = %summary.run_id, "{}", summary.summary_line()),
                Err(err) => error!(error = %err, "scheduled import failed"),
            }
        })
    })
    .with_context(|| format!("creating import job for cron {schedule:?}"))?;
    sched.add(job).await.context("adding import job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_guard_refuses_overlap() {
        let guard = RunGuard::new(false);
        let first = guard.try_begin().expect("first run starts");
        assert!(guard.clone().try_begin().is_none());
        drop(first);
        assert!(guard.try_begin().is_some());
    }

    #[test]
    fn concurrent_guard_never_blocks() {
        let guard = RunGuard::new(true);
        let _a = guard.try_begin().expect("a");
        let _b = guard.try_begin().expect("b");
    }
}
