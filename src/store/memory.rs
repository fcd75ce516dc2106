use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    config::InstanceConfiguration,
    cron::ScheduledJob,
    error::StoreError,
    instance::{Instance, RuntimeState},
    monitor::{CrashEvent, RestartOutcome},
};

use super::{Store, state::StoreState};

/// Process-local store; configurations are held alongside the records
/// instead of in instance files.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    configs: RwLock<HashMap<String, InstanceConfiguration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.state.read().await.instances.values().cloned().collect())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.state.read().await.instances.get(name).cloned())
    }

    async fn save_instance(&self, instance: Instance) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .instances
            .insert(instance.name.clone(), instance);
        Ok(())
    }

    async fn delete_instance(&self, name: &str) -> Result<bool, StoreError> {
        self.configs.write().await.remove(name);
        Ok(self.state.write().await.instances.remove(name).is_some())
    }

    async fn update_runtime(&self, name: &str, runtime: RuntimeState) -> Result<(), StoreError> {
        self.state.write().await.update_runtime(name, runtime)
    }

    async fn configuration(&self, name: &str) -> Result<InstanceConfiguration, StoreError> {
        if !self.state.read().await.instances.contains_key(name) {
            return Err(StoreError::UnknownInstance(name.to_string()));
        }
        Ok(self
            .configs
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_configuration(
        &self,
        name: &str,
        config: InstanceConfiguration,
    ) -> Result<(), StoreError> {
        self.configs.write().await.insert(name.to_string(), config);
        Ok(())
    }

    async fn record_crash(&self, event: CrashEvent) -> Result<(), StoreError> {
        self.state.write().await.crashes.push(event);
        Ok(())
    }

    async fn update_crash_outcome(
        &self,
        id: Uuid,
        outcome: RestartOutcome,
    ) -> Result<(), StoreError> {
        self.state.write().await.update_crash_outcome(id, &outcome)
    }

    async fn crashes_since(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CrashEvent>, StoreError> {
        Ok(self.state.read().await.crashes_since(name, since))
    }

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        Ok(self.state.read().await.jobs.values().cloned().collect())
    }

    async fn save_job(&self, job: ScheduledJob) -> Result<(), StoreError> {
        self.state.write().await.jobs.insert(job.id, job);
        Ok(())
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state.write().await.jobs.remove(&id).is_some())
    }

    async fn mark_job_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.write().await.mark_job_run(id, at)
    }
}
