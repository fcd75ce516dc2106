use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    config::StreamLine,
    instance::{ExitInfo, Instance, InstanceStatus, ProcessHandle, RuntimeState},
};

/// Per-instance entry in the live-process table.
///
/// `op` serializes control operations and is held for their whole
/// duration. `state` is only held for short, non-blocking updates so
/// snapshots and liveness queries never wait on a slow stop.
#[derive(Debug)]
pub(crate) struct Slot {
    pub op: Mutex<()>,
    pub state: Mutex<SlotState>,
}

impl Slot {
    pub fn new(state: SlotState) -> Self {
        Self {
            op: Mutex::new(()),
            state: Mutex::new(state),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub instance: Instance,
    pub status: InstanceStatus,
    pub handle: Option<ProcessHandle>,
    /// Set before any supervisor-initiated termination so the exit is not
    /// taken for a crash.
    pub expected_stop: bool,
}

impl SlotState {
    pub fn runtime(&self) -> RuntimeState {
        RuntimeState {
            status: self.status,
            pid: self.handle.as_ref().map(ProcessHandle::pid),
            session_id: self.handle.as_ref().map(|h| h.session_id().to_string()),
        }
    }

    /// Moves to `next`, returning the previous status.
    pub fn transition(&mut self, next: InstanceStatus) -> InstanceStatus {
        std::mem::replace(&mut self.status, next)
    }
}

/// Point-in-time view of one live instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub session_id: String,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub adopted: bool,
}

/// Context of a process that died while Running with no stop requested.
#[derive(Debug, Clone)]
pub struct ExitObservation {
    pub instance: Instance,
    pub pid: i32,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    /// `None` for adopted processes, which cannot be reaped.
    pub exit: Option<ExitInfo>,
    pub recent_output: Vec<StreamLine>,
    pub last_output_at: Option<DateTime<Utc>>,
}
