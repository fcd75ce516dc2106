use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    config::InstanceConfiguration,
    cron::ScheduledJob,
    error::StoreError,
    instance::{Instance, RuntimeState},
    monitor::{CrashEvent, RestartOutcome},
    utils::fix_ownership,
};

use super::{Store, state::StoreState};

const STATE_FILE: &str = "state.json";

/// JSON snapshot under the data directory. Every mutation rewrites the
/// whole file through a temp file and rename, so readers never see a
/// half-written state.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

impl FileStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let io = |source| StoreError::Io {
            path: data_dir.to_path_buf(),
            source,
        };
        tokio::fs::create_dir_all(data_dir).await.map_err(io)?;

        let path = data_dir.join(STATE_FILE);
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreState::default(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        debug!(path = %path.display(), "opened state store");
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    async fn persist(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        let io = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        tokio::fs::write(&tmp, bytes).await.map_err(io)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io)
    }

    /// Applies `f` under the write lock and persists the result. The
    /// in-memory copy is only replaced once the file is written.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(out)
    }

    async fn root_of(&self, name: &str) -> Result<PathBuf, StoreError> {
        self.state
            .read()
            .await
            .instances
            .get(name)
            .map(|i| i.root_dir.clone())
            .ok_or_else(|| StoreError::UnknownInstance(name.to_string()))
    }
}

async fn prepare_root(instance: &Instance) -> Result<(), StoreError> {
    let root = instance.root_dir.clone();
    if tokio::fs::try_exists(&root).await.unwrap_or(false) {
        return Ok(());
    }
    tokio::fs::create_dir_all(&root)
        .await
        .map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;

    let (Some(uid), Some(gid)) = (instance.uid, instance.gid) else {
        return Ok(());
    };
    let name = instance.name.clone();
    let failures = tokio::task::spawn_blocking(move || fix_ownership(&root, uid, gid))
        .await
        .unwrap_or_else(|e| vec![e.to_string()]);
    for failure in failures {
        warn!(instance = %name, %failure, "ownership fix failed");
    }
    Ok(())
}

#[async_trait]
impl Store for FileStore {
    async fn list_instances(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.state.read().await.instances.values().cloned().collect())
    }

    async fn get_instance(&self, name: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.state.read().await.instances.get(name).cloned())
    }

    async fn save_instance(&self, instance: Instance) -> Result<(), StoreError> {
        prepare_root(&instance).await?;
        self.mutate(|s| {
            s.instances.insert(instance.name.clone(), instance);
            Ok(())
        })
        .await
    }

    async fn delete_instance(&self, name: &str) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.instances.remove(name).is_some())).await
    }

    async fn update_runtime(&self, name: &str, runtime: RuntimeState) -> Result<(), StoreError> {
        self.mutate(|s| s.update_runtime(name, runtime)).await
    }

    async fn configuration(&self, name: &str) -> Result<InstanceConfiguration, StoreError> {
        let root = self.root_of(name).await?;
        let path = InstanceConfiguration::path(&root);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(InstanceConfiguration::default());
        }
        Ok(InstanceConfiguration::load(&root).await?)
    }

    async fn save_configuration(
        &self,
        name: &str,
        config: InstanceConfiguration,
    ) -> Result<(), StoreError> {
        let root = self.root_of(name).await?;
        Ok(config.save(&root).await?)
    }

    async fn record_crash(&self, event: CrashEvent) -> Result<(), StoreError> {
        self.mutate(|s| {
            s.crashes.push(event);
            Ok(())
        })
        .await
    }

    async fn update_crash_outcome(
        &self,
        id: Uuid,
        outcome: RestartOutcome,
    ) -> Result<(), StoreError> {
        self.mutate(|s| s.update_crash_outcome(id, &outcome)).await
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
        self.mutate(|s| {
            s.jobs.insert(job.id, job);
            Ok(())
        })
        .await
    }

    async fn delete_job(&self, id: Uuid) -> Result<bool, StoreError> {
        self.mutate(|s| Ok(s.jobs.remove(&id).is_some())).await
    }

    async fn mark_job_run(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.mutate(|s| s.mark_job_run(id, at)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cron::Action, instance::InstanceStatus};

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("instances").join("survival");

        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save_instance(Instance::new("survival", &root))
            .await
            .unwrap();
        assert!(root.is_dir());

        let job = ScheduledJob::new("survival", "0 4 * * *", Action::Restart).unwrap();
        store.save_job(job.clone()).await.unwrap();
        store
            .update_runtime(
                "survival",
                RuntimeState {
                    status: InstanceStatus::Running,
                    pid: Some(1234),
                    session_id: None,
                },
            )
            .await
            .unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let instance = reopened.get_instance("survival").await.unwrap().unwrap();
        assert_eq!(instance.pid, Some(1234));
        assert_eq!(reopened.list_jobs().await.unwrap(), vec![job]);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test]
    async fn failed_mutation_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(
            store
                .update_runtime("ghost", RuntimeState::stopped())
                .await
                .is_err()
        );
        assert!(store.list_instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn configuration_lives_in_instance_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("creative");
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save_instance(Instance::new("creative", &root))
            .await
            .unwrap();

        assert!(!store.configuration("creative").await.unwrap().on_reboot_start);

        let mut config = InstanceConfiguration::default();
        config.on_reboot_start = true;
        config.launch.max_memory = Some("2G".into());
        store
            .save_configuration("creative", config.clone())
            .await
            .unwrap();

        assert!(root.join("mineguard.ini").is_file());
        assert_eq!(store.configuration("creative").await.unwrap(), config);
    }

    #[tokio::test]
    async fn malformed_configuration_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("broken");
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .save_instance(Instance::new("broken", &root))
            .await
            .unwrap();
        tokio::fs::write(root.join("mineguard.ini"), "[Features\nLanBroadcast=yes\n")
            .await
            .unwrap();

        assert!(matches!(
            store.configuration("broken").await,
            Err(StoreError::Config(_))
        ));
    }
}
