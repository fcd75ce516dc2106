use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cron::ScheduledJob,
    error::StoreError,
    instance::{Instance, RuntimeState},
    monitor::{CrashEvent, RestartOutcome},
};

/// Record tables shared by the in-memory and file-backed stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub instances: BTreeMap<String, Instance>,
    #[serde(default)]
    pub crashes: Vec<CrashEvent>,
    #[serde(default)]
    pub jobs: BTreeMap<Uuid, ScheduledJob>,
}

impl StoreState {
    pub fn update_runtime(&mut self, name: &str, runtime: RuntimeState) -> Result<(), StoreError> {
        let instance = self
            .instances
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownInstance(name.to_string()))?;
        instance.status = runtime.status;
        instance.pid = runtime.pid;
        instance.session_id = runtime.session_id;
        Ok(())
    }

    pub fn update_crash_outcome(
        &mut self,
        id: Uuid,
        outcome: &RestartOutcome,
    ) -> Result<(), StoreError> {
        let event = self
            .crashes
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::UnknownRecord(id))?;
        event.apply(outcome);
        Ok(())
    }

    pub fn crashes_since(&self, name: &str, since: DateTime<Utc>) -> Vec<CrashEvent> {
        self.crashes
            .iter()
            .filter(|e| e.instance == name && e.detected_at >= since)
            .cloned()
            .collect()
    }

    pub fn mark_job_run(&mut self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let job = self.jobs.get_mut(&id).ok_or(StoreError::UnknownRecord(id))?;
        job.last_run_at = Some(at);
        Ok(())
    }
}
