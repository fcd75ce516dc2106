use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::supervisor::ProcessSupervisor;

/// What a reconciliation pass did, by instance name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub already_running: Vec<String>,
    pub failed: Vec<(String, String)>,
}

/// Boot-time pass starting every `OnRebootStart` instance that is not
/// already running.
pub struct StartupReconciler {
    supervisor: Arc<ProcessSupervisor>,
    warmup: Duration,
}

impl StartupReconciler {
    pub fn new(supervisor: Arc<ProcessSupervisor>, warmup: Duration) -> Self {
        Self { supervisor, warmup }
    }

    /// Waits out the warm-up delay, then reconciles once. Returns `None`
    /// when cancelled first.
    pub async fn run(&self, cancel: CancellationToken) -> Option<ReconcileReport> {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("startup reconciliation cancelled during warm-up");
                return None;
            }
            _ = tokio::time::sleep(self.warmup) => {}
        }
        Some(self.reconcile_once().await)
    }

    pub async fn reconcile_once(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let store = self.supervisor.store();

        let instances = match store.list_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                error!(error = %e, "cannot list instances for startup reconciliation");
                return report;
            }
        };

        for instance in instances {
            let name = instance.name.clone();
            match store.configuration(&name).await {
                Ok(config) if config.on_reboot_start => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(instance = %name, error = %e, "configuration unreadable, skipping auto-start");
                    continue;
                }
            }

            self.supervisor.register(instance).await;
            match self.supervisor.is_server_running(&name).await {
                Ok(true) => {
                    info!(instance = %name, "already running");
                    report.already_running.push(name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(instance = %name, error = %e, "liveness check failed");
                    report.failed.push((name, e.to_string()));
                    continue;
                }
            }

            match self.supervisor.start_server(&name).await {
                Ok(status) => {
                    info!(instance = %name, ?status, "auto-started on boot");
                    report.started.push(name);
                }
                Err(e) => {
                    error!(instance = %name, error = %e, "auto-start failed");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        info!(
            started = report.started.len(),
            already_running = report.already_running.len(),
            failed = report.failed.len(),
            "startup reconciliation finished"
        );
        report
    }
}
