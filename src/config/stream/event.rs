use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instance::InstanceStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    StateChange {
        old: InstanceStatus,
        new: InstanceStatus,
    },

    /// The process vanished while Running with no stop requested.
    Crashed { pid: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceEvent {
    pub id: Uuid,

    pub instance: String,

    pub timestamp: DateTime<Utc>,

    pub payload: EventPayload,
}

impl InstanceEvent {
    pub fn new<S: Into<String>>(instance: S, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance: instance.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn state_change<S: Into<String>>(
        instance: S,
        old: InstanceStatus,
        new: InstanceStatus,
    ) -> Self {
        Self::new(instance, EventPayload::StateChange { old, new })
    }
}

impl Display for InstanceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            EventPayload::StateChange { old, new } => write!(
                f,
                "[{}] {}: state changed {:?} -> {:?}",
                self.timestamp, self.instance, old, new
            ),
            EventPayload::Crashed { pid } => write!(
                f,
                "[{}] {}: process {} exited unexpectedly",
                self.timestamp, self.instance, pid
            ),
        }
    }
}
