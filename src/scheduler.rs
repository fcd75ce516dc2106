//! Cron job evaluation and dispatch.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    backup::BackupService,
    cron::{Action, CronExpr, ScheduledJob},
    error::{DispatchError, ServerError},
    supervisor::ProcessSupervisor,
};

pub struct CronScheduler {
    supervisor: Arc<ProcessSupervisor>,
    backup: Option<Arc<dyn BackupService>>,
    dispatches: TaskTracker,
}

impl CronScheduler {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        Self {
            supervisor,
            backup: None,
            dispatches: TaskTracker::new(),
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BackupService>) -> Self {
        self.backup = Some(backup);
        self
    }

    /// Evaluates every enabled job against `now` and dispatches the ones
    /// due this minute. `LastRunAt` is written as soon as a job is handed
    /// off, before its action completes. Returns the ids fired.
    pub async fn tick<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Vec<Uuid> {
        let store = self.supervisor.store();
        let jobs = match store.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to load scheduled jobs");
                return Vec::new();
            }
        };

        let now_utc = now.with_timezone(&Utc);
        let mut fired = Vec::new();
        for job in jobs.into_iter().filter(|j| j.enabled) {
            let expr = match job.expression.parse::<CronExpr>() {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(job = %job.id, expression = %job.expression, error = %e, "skipping invalid job");
                    continue;
                }
            };
            if !expr.matches(&now) || job.ran_in_minute(now_utc) {
                continue;
            }

            let id = job.id;
            debug!(job = %id, instance = %job.instance, action = ?job.action, "job due");
            self.dispatch(job);

            if let Err(e) = store.mark_job_run(id, now_utc).await {
                error!(job = %id, error = %e, "failed to record job run");
            }
            fired.push(id);
        }
        fired
    }

    fn dispatch(&self, job: ScheduledJob) {
        let supervisor = self.supervisor.clone();
        let backup = self.backup.clone();
        self.dispatches.spawn(async move {
            match run_action(&supervisor, backup.as_deref(), &job).await {
                Ok(()) => {
                    info!(job = %job.id, instance = %job.instance, action = ?job.action, "job completed");
                }
                Err(e) => {
                    error!(job = %job.id, instance = %job.instance, action = ?job.action, error = %e, "job failed");
                }
            }
        });
    }

    /// Waits for every in-flight dispatch.
    pub async fn wait_dispatched(&self) {
        self.dispatches.close();
        self.dispatches.wait().await;
        self.dispatches.reopen();
    }
}

async fn run_action(
    supervisor: &ProcessSupervisor,
    backup: Option<&dyn BackupService>,
    job: &ScheduledJob,
) -> Result<(), DispatchError> {
    let name = job.instance.as_str();
    match &job.action {
        Action::Start => {
            supervisor.start_server(name).await?;
        }
        Action::Stop => {
            supervisor.stop_server(name, true).await?;
        }
        Action::Restart => {
            supervisor.restart_server(name).await?;
        }
        Action::Backup => {
            let backup = backup.ok_or(DispatchError::NoBackupService)?;
            let instance = supervisor
                .store()
                .get_instance(name)
                .await?
                .ok_or_else(|| ServerError::UnknownInstance(name.to_string()))?;
            backup.backup(&instance).await?;
        }
        Action::Command(text) => {
            supervisor.send_command(name, text).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        config::SupervisorSettings,
        instance::{Instance, InstanceStatus},
        store::{MemoryStore, Store},
    };

    async fn scheduler() -> (CronScheduler, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store
            .save_instance(Instance::new("survival", "/nonexistent/survival"))
            .await
            .unwrap();
        let supervisor = Arc::new(ProcessSupervisor::new(
            store.clone(),
            SupervisorSettings::default(),
        ));
        (CronScheduler::new(supervisor), store)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, h, m, s).unwrap()
    }

    #[tokio::test]
    async fn every_minute_job_fires_once_per_minute() {
        let (scheduler, store) = scheduler().await;
        let job = ScheduledJob::new("survival", "* * * * *", Action::Command("say hi".into()))
            .unwrap();
        let id = job.id;
        store.save_job(job).await.unwrap();

        assert_eq!(scheduler.tick(at(12, 0, 1)).await, vec![id]);
        assert!(scheduler.tick(at(12, 0, 21)).await.is_empty());
        assert!(scheduler.tick(at(12, 0, 59)).await.is_empty());
        assert_eq!(scheduler.tick(at(12, 1, 0)).await, vec![id]);
        scheduler.wait_dispatched().await;

        let job = &store.list_jobs().await.unwrap()[0];
        assert_eq!(job.last_run_at, Some(at(12, 1, 0)));
    }

    #[tokio::test]
    async fn failed_dispatch_still_records_run_and_others_fire() {
        let (scheduler, store) = scheduler().await;
        // Nothing is running, so this dispatch fails.
        let failing = ScheduledJob::new("ghost", "0 4 * * *", Action::Start).unwrap();
        let stop = ScheduledJob::new("survival", "0 4 * * *", Action::Stop).unwrap();
        let (failing_id, stop_id) = (failing.id, stop.id);
        store.save_job(failing).await.unwrap();
        store.save_job(stop).await.unwrap();

        let mut fired = scheduler.tick(at(4, 0, 10)).await;
        fired.sort();
        let mut expected = vec![failing_id, stop_id];
        expected.sort();
        assert_eq!(fired, expected);
        scheduler.wait_dispatched().await;

        for job in store.list_jobs().await.unwrap() {
            assert_eq!(job.last_run_at, Some(at(4, 0, 10)));
        }
        let instance = store.get_instance("survival").await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn disabled_and_unparseable_jobs_are_skipped() {
        let (scheduler, store) = scheduler().await;
        let mut disabled = ScheduledJob::new("survival", "* * * * *", Action::Stop).unwrap();
        disabled.enabled = false;
        let mut broken = ScheduledJob::new("survival", "* * * * *", Action::Stop).unwrap();
        broken.expression = "every minute".into();
        store.save_job(disabled).await.unwrap();
        store.save_job(broken).await.unwrap();

        assert!(scheduler.tick(at(9, 30, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn backup_without_service_is_a_dispatch_error() {
        let (scheduler, _store) = scheduler().await;
        let job = ScheduledJob::new("survival", "* * * * *", Action::Backup).unwrap();
        let err = run_action(&scheduler.supervisor, None, &job)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoBackupService));
    }

    #[tokio::test]
    async fn guard_survives_scheduler_restart_mid_minute() {
        let (first, store) = scheduler().await;
        let job = ScheduledJob::new("survival", "*/5 * * * *", Action::Stop).unwrap();
        store.save_job(job).await.unwrap();
        assert_eq!(first.tick(at(10, 5, 2)).await.len(), 1);
        first.wait_dispatched().await;

        let second = CronScheduler::new(first.supervisor.clone());
        assert!(second.tick(at(10, 5, 40)).await.is_empty());
        assert!(second.tick(at(10, 6, 0)).await.is_empty());
        assert_eq!(
            second.tick(at(10, 5, 0) + Duration::minutes(5)).await.len(),
            1
        );
    }
}
