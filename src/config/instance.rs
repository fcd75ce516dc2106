use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

use super::ini::{self, IniDocument};

pub const INSTANCE_CONFIG_FILE: &str = "mineguard.ini";

const LAUNCH: &str = "launch";
const FEATURES: &str = "features";

/// Launch parameters for one instance. Read at start time only; edits take
/// effect on the next launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSettings {
    pub java_path: PathBuf,
    pub min_memory: Option<String>,
    pub max_memory: Option<String>,
    /// Relative to the instance root. `None` launches `java_path` with only
    /// the JVM and server arguments.
    pub jar: Option<PathBuf>,
    pub jvm_args: Vec<String>,
    pub server_args: Vec<String>,
    pub stop_command: String,
    /// Wait for `server-port` to accept connections before reporting Running.
    pub wait_for_port: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            java_path: PathBuf::from("java"),
            min_memory: None,
            max_memory: None,
            jar: Some(PathBuf::from("server.jar")),
            jvm_args: Vec::new(),
            server_args: vec!["nogui".to_string()],
            stop_command: "stop".to_string(),
            wait_for_port: false,
        }
    }
}

impl LaunchSettings {
    /// Program and argument vector in launch order.
    pub fn argv(&self) -> (PathBuf, Vec<String>) {
        let mut args = Vec::new();
        if let Some(min) = &self.min_memory {
            args.push(format!("-Xms{min}"));
        }
        if let Some(max) = &self.max_memory {
            args.push(format!("-Xmx{max}"));
        }
        args.extend(self.jvm_args.iter().cloned());
        if let Some(jar) = &self.jar {
            args.push("-jar".to_string());
            args.push(jar.to_string_lossy().into_owned());
        }
        args.extend(self.server_args.iter().cloned());
        (self.java_path.clone(), args)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfiguration {
    pub launch: LaunchSettings,
    pub on_reboot_start: bool,
    pub lan_broadcast: bool,
}

impl InstanceConfiguration {
    pub fn path(root: &Path) -> PathBuf {
        root.join(INSTANCE_CONFIG_FILE)
    }

    /// Reads `mineguard.ini` from the instance root.
    pub async fn load(root: &Path) -> Result<Self, ConfigError> {
        let doc = IniDocument::load(&Self::path(root)).await?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &IniDocument) -> Result<Self, ConfigError> {
        let defaults = LaunchSettings::default();
        let text = |key: &str| {
            doc.get(LAUNCH, key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let words = |key: &str| -> Option<Vec<String>> {
            doc.get(LAUNCH, key)
                .map(|v| v.split_whitespace().map(str::to_string).collect())
        };

        let launch = LaunchSettings {
            java_path: text("JavaPath")
                .map(PathBuf::from)
                .unwrap_or(defaults.java_path),
            min_memory: text("MinMemory"),
            max_memory: text("MaxMemory"),
            jar: match doc.get(LAUNCH, "Jar") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(PathBuf::from(v.trim())),
                None => defaults.jar,
            },
            jvm_args: words("JvmArgs").unwrap_or(defaults.jvm_args),
            server_args: words("ServerArgs").unwrap_or(defaults.server_args),
            stop_command: text("StopCommand").unwrap_or(defaults.stop_command),
            wait_for_port: doc.get_bool(LAUNCH, "WaitForPort")?.unwrap_or(false),
        };

        if let Some(jar) = &launch.jar
            && !jar.is_relative()
        {
            return Err(ConfigError::InvalidValue {
                key: "Jar".to_string(),
                value: jar.display().to_string(),
            });
        }

        Ok(Self {
            launch,
            on_reboot_start: doc.get_bool(FEATURES, "OnRebootStart")?.unwrap_or(false),
            lan_broadcast: doc.get_bool(FEATURES, "LanBroadcast")?.unwrap_or(false),
        })
    }

    pub fn to_ini_string(&self) -> String {
        let l = &self.launch;
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        ini::render(&[
            (
                "Launch",
                vec![
                    ("JavaPath", l.java_path.display().to_string()),
                    ("MinMemory", opt(&l.min_memory)),
                    ("MaxMemory", opt(&l.max_memory)),
                    (
                        "Jar",
                        l.jar
                            .as_ref()
                            .map(|j| j.display().to_string())
                            .unwrap_or_default(),
                    ),
                    ("JvmArgs", l.jvm_args.join(" ")),
                    ("ServerArgs", l.server_args.join(" ")),
                    ("StopCommand", l.stop_command.clone()),
                    ("WaitForPort", l.wait_for_port.to_string()),
                ],
            ),
            (
                "Features",
                vec![
                    ("LanBroadcast", self.lan_broadcast.to_string()),
                    ("OnRebootStart", self.on_reboot_start.to_string()),
                ],
            ),
        ])
    }

    pub async fn save(&self, root: &Path) -> Result<(), ConfigError> {
        let path = Self::path(root);
        let tmp = path.with_extension("ini.tmp");
        let io = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        tokio::fs::write(&tmp, self.to_ini_string()).await.map_err(io)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io)
    }
}
