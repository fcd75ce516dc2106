//! Periodic crash detection, classification and restart policy.

mod classify;
mod event;
mod log_source;

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use classify::{
    Classification, CrashClassifier, CrashContext, CrashReportClassifier, OutOfMemoryClassifier,
    TimeoutClassifier, classify, default_chain,
};
pub use event::{CrashEvent, CrashType, RestartOutcome};
pub use log_source::{LatestLogFile, LogSource};

use crate::{
    config::CrashMonitorSettings,
    error::{ConfigError, StoreError},
    supervisor::{ExitObservation, ProcessSupervisor},
};

const LOG_TAIL_LINES: usize = 200;

#[derive(Clone)]
pub struct CrashMonitor {
    supervisor: Arc<ProcessSupervisor>,
    settings: Arc<CrashMonitorSettings>,
    classifiers: Arc<Vec<Box<dyn CrashClassifier>>>,
    log_source: Arc<dyn LogSource>,
}

impl CrashMonitor {
    pub fn new(
        supervisor: Arc<ProcessSupervisor>,
        settings: CrashMonitorSettings,
    ) -> Result<Self, ConfigError> {
        let classifiers = default_chain(&settings)
            .map_err(|e| ConfigError::Invalid(format!("Invalid OOM pattern: {e}")))?;
        Ok(Self {
            supervisor,
            settings: Arc::new(settings),
            classifiers: Arc::new(classifiers),
            log_source: Arc::new(LatestLogFile),
        })
    }

    /// Replaces the classification chain.
    pub fn with_classifiers(mut self, classifiers: Vec<Box<dyn CrashClassifier>>) -> Self {
        self.classifiers = Arc::new(classifiers);
        self
    }

    pub fn with_log_source(mut self, source: Arc<dyn LogSource>) -> Self {
        self.log_source = source;
        self
    }

    /// One pass over every Running instance. Instances are inspected
    /// concurrently; a failure on one is logged and does not affect the
    /// rest. Returns the crash events recorded in this pass.
    pub async fn run_cycle(&self) -> Vec<CrashEvent> {
        let mut set = JoinSet::new();
        for name in self.supervisor.running_instances().await {
            let monitor = self.clone();
            set.spawn(async move {
                let result = monitor.inspect(&name).await;
                (name, result)
            });
        }

        let mut events = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(Some(event)))) => events.push(event),
                Ok((_, Ok(None))) => {}
                Ok((name, Err(e))) => {
                    error!(instance = %name, error = %e, "crash handling failed");
                }
                Err(e) => error!(error = %e, "crash inspection task failed"),
            }
        }
        events
    }

    async fn inspect(&self, name: &str) -> Result<Option<CrashEvent>, StoreError> {
        match self.supervisor.is_server_running(name).await {
            Ok(true) => return Ok(None),
            Ok(false) => {}
            Err(e) => {
                warn!(instance = %name, error = %e, "liveness check failed");
                return Ok(None);
            }
        }

        let Some(observation) = self.supervisor.observe_exit(name).await else {
            return Ok(None);
        };

        let ctx = self.context(observation).await;
        let classification = classify(&self.classifiers, &ctx).await;
        let store = self.supervisor.store();

        let mut event = CrashEvent::new(
            name,
            classification.crash_type,
            classification.details,
            ctx.detected_at,
        );

        let window_start = ctx
            .detected_at
            .checked_sub_signed(window(&self.settings))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let prior = store.crashes_since(name, window_start).await?.len();
        store.record_crash(event.clone()).await?;
        warn!(
            instance = %name,
            crash_type = ?event.crash_type,
            details = event.details.as_deref().unwrap_or(""),
            prior,
            "crash recorded"
        );

        if !self.settings.auto_restart {
            info!(instance = %name, "auto-restart disabled, leaving stopped");
            return Ok(Some(event));
        }
        if prior >= self.settings.max_crashes as usize {
            error!(
                instance = %name,
                crashes = prior + 1,
                window_secs = self.settings.window_secs,
                "crash loop detected, auto-restart suppressed; manual intervention required"
            );
            return Ok(Some(event));
        }

        let attempted_at = Utc::now();
        let succeeded = match self.supervisor.restart_server(name).await {
            Ok(status) => {
                info!(instance = %name, ?status, "auto-restart succeeded");
                true
            }
            Err(e) => {
                warn!(instance = %name, error = %e, "auto-restart failed");
                false
            }
        };

        let outcome = RestartOutcome {
            succeeded,
            attempted_at,
        };
        store.update_crash_outcome(event.id, outcome).await?;
        event.apply(&outcome);
        Ok(Some(event))
    }

    async fn context(&self, observation: ExitObservation) -> CrashContext {
        let instance = &observation.instance;
        let mut lines: Vec<String> = observation
            .recent_output
            .iter()
            .map(|l| l.line.clone())
            .collect();
        lines.extend(self.log_source.recent_lines(instance, LOG_TAIL_LINES).await);

        let last_activity = observation
            .last_output_at
            .max(self.log_source.last_activity(instance).await);
        debug!(instance = %instance.name, lines = lines.len(), "collected crash context");

        CrashContext {
            observation,
            lines,
            last_activity,
            detected_at: Utc::now(),
        }
    }
}

fn window(settings: &CrashMonitorSettings) -> ChronoDuration {
    i64::try_from(settings.window_secs)
        .ok()
        .and_then(ChronoDuration::try_seconds)
        .unwrap_or(ChronoDuration::MAX)
}
