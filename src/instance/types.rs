use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Unique key.
    pub name: String,
    pub root_dir: PathBuf,
    #[serde(default)]
    pub uid: Option<u32>,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub status: InstanceStatus,
    #[serde(default)]
    pub pid: Option<i32>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl Instance {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(name: S, root_dir: P) -> Self {
        Self {
            name: name.into(),
            root_dir: root_dir.into(),
            uid: None,
            gid: None,
            status: InstanceStatus::Stopped,
            pid: None,
            session_id: None,
        }
    }

    pub fn with_owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    #[default]
    Unknown,
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl InstanceStatus {
    /// Has (or is acquiring) a live process group.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

/// Supervisor-owned runtime fields mirrored into the persisted [`Instance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub status: InstanceStatus,
    pub pid: Option<i32>,
    pub session_id: Option<String>,
}

impl RuntimeState {
    pub fn stopped() -> Self {
        Self {
            status: InstanceStatus::Stopped,
            pid: None,
            session_id: None,
        }
    }
}

/// How the managed process is wrapped so commands can reach its console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Piped stdio owned by the supervisor; output is captured in memory.
    #[default]
    Direct,
    /// Detached GNU screen session; survives supervisor restarts.
    Screen,
}
