mod handle;
mod types;

pub use handle::{ExitInfo, ProcessHandle};
pub use types::{Instance, InstanceStatus, RuntimeState, SessionKind};
