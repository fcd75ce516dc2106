use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Malformed line {line}: {content}")]
    Malformed { line: usize, content: String },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to parse daemon config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Failed to serialize daemon config: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Configuration invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("Expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("Empty {0} field")]
    EmptyField(&'static str),

    #[error("Incorrect {field} value: {value}")]
    IncorrectValue { field: &'static str, value: String },

    #[error("{field} value {value} outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("Incorrect {field} step: {value}")]
    IncorrectStep { field: &'static str, value: String },

    #[error("Reversed {field} range: {value}")]
    ReversedRange { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Store encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Unknown record: {0}")]
    UnknownRecord(uuid::Uuid),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("Failed to spawn server process: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },

    #[error("Server exited during startup ({0})")]
    EarlyCrash(String),

    #[error("Server is not running")]
    NotRunning,

    #[error("Server has no attached session")]
    NoSession,

    #[error("Failed to write to session input")]
    StdinWriteFailed,

    #[error("Session command failed: {0}")]
    SessionCommandFailed(String),

    #[error("Process {pid} still alive {secs}s after forced termination")]
    StopTimeout { pid: i32, secs: u64 },

    #[error("Previous process {pid} has not exited")]
    PreviousAlive { pid: i32 },

    #[error("Invalid launch configuration: {0}")]
    InvalidLaunch(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    #[error("No captured output for this session")]
    NoOutput,
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Backup I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[cfg(feature = "backup")]
    #[error("Archive write failed: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Backup task aborted")]
    Aborted,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No backup service configured")]
    NoBackupService,
}

#[derive(Debug, Error)]
pub enum LanError {
    #[error("Failed to open discovery socket: {0}")]
    Socket(#[source] io::Error),

    #[error("Invalid discovery target: {0}")]
    Target(String),
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
