//! Wires the supervisor and its background tasks together.

use std::{sync::Arc, time::Duration};

use chrono::Local;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::{
    config::DaemonConfig,
    error::DaemonError,
    monitor::CrashMonitor,
    periodic::run_periodic,
    reconcile::StartupReconciler,
    scheduler::CronScheduler,
    store::Store,
    supervisor::ProcessSupervisor,
};

pub struct Daemon;

impl Daemon {
    /// Registers every stored instance, then launches the crash monitor,
    /// scheduler and LAN loops plus the one-shot startup reconciler.
    pub async fn start(
        config: DaemonConfig,
        store: Arc<dyn Store>,
    ) -> Result<DaemonHandle, DaemonError> {
        config.validate()?;

        let supervisor = Arc::new(ProcessSupervisor::new(
            store.clone(),
            config.supervisor.clone(),
        ));
        for instance in store.list_instances().await? {
            supervisor.register(instance).await;
        }

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let monitor = CrashMonitor::new(supervisor.clone(), config.crash_monitor.clone())?;
        tasks.spawn(run_periodic(
            "crash-monitor",
            Duration::from_secs(config.crash_monitor.interval_secs),
            cancel.child_token(),
            move || {
                let monitor = monitor.clone();
                async move {
                    monitor.run_cycle().await;
                }
            },
        ));

        let scheduler = config.scheduler.enabled.then(|| {
            let scheduler = CronScheduler::new(supervisor.clone());
            #[cfg(feature = "backup")]
            let scheduler = scheduler.with_backup(Arc::new(
                crate::backup::ZipBackup::new(config.backup_dir())
                    .with_supervisor(supervisor.clone()),
            ));
            Arc::new(scheduler)
        });
        if let Some(scheduler) = scheduler.clone() {
            tasks.spawn(run_periodic(
                "cron-scheduler",
                Duration::from_secs(config.scheduler.tick_secs),
                cancel.child_token(),
                move || {
                    let scheduler = scheduler.clone();
                    async move {
                        scheduler.tick(Local::now()).await;
                    }
                },
            ));
        }

        #[cfg(feature = "lan")]
        if config.lan.enabled {
            match crate::lan::LanAnnouncer::bind(supervisor.clone(), &config.lan).await {
                Ok(announcer) => {
                    let announcer = Arc::new(announcer);
                    tasks.spawn(run_periodic(
                        "lan-announcer",
                        Duration::from_millis(config.lan.interval_ms),
                        cancel.child_token(),
                        move || {
                            let announcer = announcer.clone();
                            async move {
                                announcer.announce_once().await;
                            }
                        },
                    ));
                }
                Err(e) => warn!(error = %e, "LAN announcer disabled"),
            }
        }

        if config.startup.reconcile {
            let reconciler = StartupReconciler::new(
                supervisor.clone(),
                Duration::from_secs(config.startup.warmup_secs),
            );
            let token = cancel.child_token();
            tasks.spawn(async move {
                reconciler.run(token).await;
            });
        }

        info!(data_dir = %config.data_dir.display(), "daemon started");
        Ok(DaemonHandle {
            supervisor,
            scheduler,
            cancel,
            tasks,
        })
    }
}

pub struct DaemonHandle {
    supervisor: Arc<ProcessSupervisor>,
    scheduler: Option<Arc<CronScheduler>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl DaemonHandle {
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels every loop and waits for them, and any in-flight scheduled
    /// dispatch, for up to `grace`. Managed servers keep running. Returns
    /// false when the grace period ran out.
    pub async fn shutdown(self, grace: Duration) -> bool {
        info!(grace_secs = grace.as_secs(), "daemon shutting down");
        self.cancel.cancel();
        self.tasks.close();

        let drained = async {
            self.tasks.wait().await;
            if let Some(scheduler) = &self.scheduler {
                scheduler.wait_dispatched().await;
            }
        };

        match tokio::time::timeout(grace, drained).await {
            Ok(()) => {
                info!("daemon stopped");
                true
            }
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "background tasks still running after grace period"
                );
                false
            }
        }
    }
}
