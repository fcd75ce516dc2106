mod daemon;
pub mod ini;
mod instance;
pub mod properties;
pub mod stream;

pub use daemon::{
    BackupSettings, CrashMonitorSettings, DaemonConfig, LanSettings, LoggingSettings,
    SchedulerSettings, StartupSettings, SupervisorSettings,
};
pub use instance::{INSTANCE_CONFIG_FILE, InstanceConfiguration, LaunchSettings};
pub use properties::Properties;
pub use stream::{EventPayload, InstanceEvent, StreamLine, StreamSource};
