//! Persistence collaborator: simple keyed CRUD over instances, their
//! configuration, crash events and scheduled jobs.

mod file;
mod memory;
mod state;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::{
    config::InstanceConfiguration,
    cron::ScheduledJob,
    error::StoreError,
    instance::{Instance, RuntimeState},
    monitor::{CrashEvent, RestartOutcome},
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError>;

    async fn get_instance(&self, name: &str) -> Result<Option<Instance>, StoreError>;

    async fn save_instance(&self, instance: Instance) -> Result<(), StoreError>;

    async fn delete_instance(&self, name: &str) -> Result<bool, StoreError>;

    /// Mirrors supervisor-owned status, pid and session id.
    async fn update_runtime(&self, name: &str, runtime: RuntimeState) -> Result<(), StoreError>;

    async fn configuration(&self, name: &str) -> Result<InstanceConfiguration, StoreError>;

    async fn save_configuration(
        &self,
        name: &str,
        config: InstanceConfiguration,
    ) -> Result<(), StoreError>;

    async fn record_crash(&self, event: CrashEvent) -> Result<(), StoreError>;

    /// The only mutation allowed on a recorded crash.
    async fn update_crash_outcome(
        &self,
        id: Uuid,
        outcome: RestartOutcome,
    ) -> Result<(), StoreError>;

    async fn crashes_since(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<CrashEvent>, StoreError>;

    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, StoreError>;

    async fn save_job(&self, job: ScheduledJob) -> Result<(), StoreError>;

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn mark_job_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;
}
