use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashType {
    ProcessDeath,
    CrashReport,
    OutOfMemory,
    Timeout,
}

/// Append-only crash log entry. Only the restart outcome fields are ever
/// filled in after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashEvent {
    pub id: Uuid,
    pub instance: String,
    pub detected_at: DateTime<Utc>,
    pub crash_type: CrashType,
    pub details: Option<String>,
    pub auto_restart_attempted: bool,
    pub auto_restart_succeeded: bool,
    pub restart_attempted_at: Option<DateTime<Utc>>,
}

impl CrashEvent {
    pub fn new<S: Into<String>>(
        instance: S,
        crash_type: CrashType,
        details: Option<String>,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance: instance.into(),
            detected_at,
            crash_type,
            details,
            auto_restart_attempted: false,
            auto_restart_succeeded: false,
            restart_attempted_at: None,
        }
    }

    pub fn apply(&mut self, outcome: &RestartOutcome) {
        self.auto_restart_attempted = true;
        self.auto_restart_succeeded = outcome.succeeded;
        self.restart_attempted_at = Some(outcome.attempted_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartOutcome {
    pub succeeded: bool,
    pub attempted_at: DateTime<Utc>,
}
