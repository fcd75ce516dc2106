//! Daemon configuration with defaults and validation.

use std::{
    net::SocketAddrV4,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, instance::SessionKind};

const DEFAULT_DATA_DIR: &str = "/var/lib/mineguard";
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_KILL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SETTLE_MS: u64 = 1500;
const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 10;
const DEFAULT_MAX_CRASHES: u32 = 3;
const DEFAULT_CRASH_WINDOW_SECS: u64 = 600;
const DEFAULT_SCHEDULER_TICK_SECS: u64 = 20;
const DEFAULT_LAN_INTERVAL_MS: u64 = 1500;
const DEFAULT_LAN_TARGET: &str = "224.0.2.60:4445";
const DEFAULT_WARMUP_SECS: u64 = 15;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_BACKUP_DIR: &str = "backups";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Holds `state.json`, daemon logs and backups.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub supervisor: SupervisorSettings,

    #[serde(default)]
    pub crash_monitor: CrashMonitorSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub lan: LanSettings,

    #[serde(default)]
    pub startup: StartupSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default)]
    pub session: SessionKind,

    /// Upper bound for the readiness probe after spawn.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Graceful stop budget before escalating to a forced kill.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// How long to wait for exit after SIGKILL.
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_secs: u64,

    /// The process must survive this long before it counts as ready.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashMonitorSettings {
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_true")]
    pub auto_restart: bool,

    /// Crashes tolerated inside the window before restarts are suppressed.
    #[serde(default = "default_max_crashes")]
    pub max_crashes: u32,

    #[serde(default = "default_crash_window")]
    pub window_secs: u64,

    /// Silence longer than this while Running classifies a death as Timeout.
    #[serde(default)]
    pub heartbeat_timeout_secs: Option<u64>,

    #[serde(default = "default_oom_patterns")]
    pub oom_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_scheduler_tick")]
    pub tick_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_lan_interval")]
    pub interval_ms: u64,

    #[serde(default = "default_lan_target")]
    pub target: SocketAddrV4,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupSettings {
    #[serde(default = "default_true")]
    pub reconcile: bool,

    #[serde(default = "default_warmup")]
    pub warmup_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log directory (relative to data directory)
    #[serde(default = "default_log_dir")]
    pub directory: String,

    #[serde(default = "default_true")]
    pub console: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Backup directory (relative to data directory)
    #[serde(default = "default_backup_dir")]
    pub directory: String,
}

// === Default Value Functions ===

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
fn default_true() -> bool {
    true
}
fn default_startup_timeout() -> u64 {
    DEFAULT_STARTUP_TIMEOUT_SECS
}
fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}
fn default_kill_timeout() -> u64 {
    DEFAULT_KILL_TIMEOUT_SECS
}
fn default_settle() -> u64 {
    DEFAULT_SETTLE_MS
}
fn default_monitor_interval() -> u64 {
    DEFAULT_MONITOR_INTERVAL_SECS
}
fn default_max_crashes() -> u32 {
    DEFAULT_MAX_CRASHES
}
fn default_crash_window() -> u64 {
    DEFAULT_CRASH_WINDOW_SECS
}
fn default_oom_patterns() -> Vec<String> {
    vec![
        r"java\.lang\.OutOfMemoryError".to_string(),
        r"There is insufficient memory for the Java Runtime".to_string(),
    ]
}
fn default_scheduler_tick() -> u64 {
    DEFAULT_SCHEDULER_TICK_SECS
}
fn default_lan_interval() -> u64 {
    DEFAULT_LAN_INTERVAL_MS
}
fn default_lan_target() -> SocketAddrV4 {
    // Constant literal; parse cannot fail.
    DEFAULT_LAN_TARGET
        .parse()
        .unwrap_or_else(|_| SocketAddrV4::new([224, 0, 2, 60].into(), 4445))
}
fn default_warmup() -> u64 {
    DEFAULT_WARMUP_SECS
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.into()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.into()
}
fn default_backup_dir() -> String {
    DEFAULT_BACKUP_DIR.into()
}

// === Default Implementations ===

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            supervisor: SupervisorSettings::default(),
            crash_monitor: CrashMonitorSettings::default(),
            scheduler: SchedulerSettings::default(),
            lan: LanSettings::default(),
            startup: StartupSettings::default(),
            logging: LoggingSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            session: SessionKind::default(),
            startup_timeout_secs: default_startup_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            kill_timeout_secs: default_kill_timeout(),
            settle_ms: default_settle(),
        }
    }
}

impl Default for CrashMonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            auto_restart: true,
            max_crashes: default_max_crashes(),
            window_secs: default_crash_window(),
            heartbeat_timeout_secs: None,
            oom_patterns: default_oom_patterns(),
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_scheduler_tick(),
        }
    }
}

impl Default for LanSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_lan_interval(),
            target: default_lan_target(),
        }
    }
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            reconcile: true,
            warmup_secs: default_warmup(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_dir(),
            console: true,
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            directory: default_backup_dir(),
        }
    }
}

impl SupervisorSettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

// === Configuration Operations ===

impl DaemonConfig {
    /// Load config from a TOML file; a missing file yields defaults.
    pub async fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No daemon config found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.startup_timeout_secs == 0 {
            return Err(ConfigError::Invalid("Startup timeout must be > 0".into()));
        }

        if self.supervisor.stop_timeout_secs == 0 {
            return Err(ConfigError::Invalid("Stop timeout must be > 0".into()));
        }

        if self.crash_monitor.interval_secs == 0 || self.scheduler.tick_secs == 0 {
            return Err(ConfigError::Invalid("Loop intervals must be > 0".into()));
        }

        // Ticks longer than a minute could skip a whole cron minute.
        if self.scheduler.tick_secs > 60 {
            return Err(ConfigError::Invalid(
                "Scheduler tick must be at most 60 seconds".into(),
            ));
        }

        if self.lan.interval_ms == 0 {
            return Err(ConfigError::Invalid("LAN interval must be > 0".into()));
        }

        for pattern in &self.crash_monitor.oom_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid OOM pattern {pattern}: {e}"
                )));
            }
        }

        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join(&self.logging.directory)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join(&self.backup.directory)
    }
}
