#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use mineguard_supervisor::{
    ProcessSupervisor,
    config::{InstanceConfiguration, LaunchSettings, SupervisorSettings},
    instance::Instance,
    store::{MemoryStore, Store},
};
use tempfile::TempDir;

/// Reads console lines and exits cleanly on `stop`, like a real server.
pub const SERVER: &str = r#"while read line; do [ "$line" = stop ] && exit 0; done"#;

pub struct Fixture {
    pub dir: TempDir,
    pub store: Arc<MemoryStore>,
    pub supervisor: Arc<ProcessSupervisor>,
}

pub fn settings() -> SupervisorSettings {
    SupervisorSettings {
        settle_ms: 200,
        stop_timeout_secs: 3,
        kill_timeout_secs: 2,
        startup_timeout_secs: 5,
        ..Default::default()
    }
}

pub fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let supervisor = Arc::new(ProcessSupervisor::new(store.clone(), settings()));
    Fixture {
        dir,
        store,
        supervisor,
    }
}

impl Fixture {
    /// Registers an instance whose "server" is `script` run by `sh -c`.
    pub async fn add_instance(
        &self,
        name: &str,
        script: &str,
        configure: impl FnOnce(&mut InstanceConfiguration),
    ) -> PathBuf {
        let root = self.dir.path().join(name);
        std::fs::create_dir_all(&root).unwrap();
        self.store
            .save_instance(Instance::new(name, &root))
            .await
            .unwrap();

        let mut config = InstanceConfiguration {
            launch: LaunchSettings {
                java_path: "sh".into(),
                jar: None,
                jvm_args: vec!["-c".into(), script.into()],
                server_args: Vec::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        configure(&mut config);
        self.store.save_configuration(name, config).await.unwrap();
        root
    }

    pub async fn pid(&self, name: &str) -> i32 {
        self.supervisor.get_server_processes().await[name].pid
    }
}

/// Waits until `pid` has been reaped by the supervisor's waiter.
pub async fn settle_exit() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

pub fn kill(pid: i32) {
    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid),
        nix::sys::signal::Signal::SIGKILL,
    )
    .unwrap();
}
