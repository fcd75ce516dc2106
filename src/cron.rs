mod expr;
mod job;

pub use expr::CronExpr;
pub use job::{Action, ScheduledJob, truncate_minute};
