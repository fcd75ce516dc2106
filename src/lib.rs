//! Supervision core for running many Minecraft server instances on one
//! host: process lifecycle, crash detection with restart limits, cron
//! jobs and LAN discovery announcements.

#[cfg(not(unix))]
compile_error!("mineguard-supervisor only supports unix hosts");

pub mod backup;
pub mod config;
pub mod cron;
pub mod daemon;
pub mod error;
pub mod instance;
#[cfg(feature = "lan")]
pub mod lan;
pub mod logging;
pub mod monitor;
pub mod os_signals;
pub mod periodic;
pub mod reconcile;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod utils;

pub use daemon::{Daemon, DaemonHandle};
pub use monitor::CrashMonitor;
pub use reconcile::StartupReconciler;
pub use scheduler::CronScheduler;
pub use supervisor::ProcessSupervisor;
