use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CronError;

use super::CronExpr;

/// What a scheduled job does when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "text", rename_all = "snake_case")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Backup,
    Command(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub instance: String,
    pub expression: String,
    pub action: Action,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new<S: Into<String>, E: Into<String>>(
        instance: S,
        expression: E,
        action: Action,
    ) -> Result<Self, CronError> {
        let expression = expression.into();
        expression.parse::<CronExpr>()?;

        Ok(Self {
            id: Uuid::new_v4(),
            instance: instance.into(),
            expression,
            action,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
        })
    }

    /// True when `last_run_at` already falls in the same minute as `now`.
    pub fn ran_in_minute(&self, now: DateTime<Utc>) -> bool {
        self.last_run_at
            .is_some_and(|last| truncate_minute(last) == truncate_minute(now))
    }
}

pub fn truncate_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}
