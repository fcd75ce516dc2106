use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::instance::Instance;

/// Per-instance log lines consulted by crash classification.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Up to `limit` most recent lines, oldest first.
    async fn recent_lines(&self, instance: &Instance, limit: usize) -> Vec<String>;

    /// When the log last changed, if known.
    async fn last_activity(&self, instance: &Instance) -> Option<DateTime<Utc>>;
}

/// `logs/latest.log` under the instance root, as written by vanilla and
/// most derived servers.
#[derive(Debug, Clone, Default)]
pub struct LatestLogFile;

impl LatestLogFile {
    fn path(instance: &Instance) -> PathBuf {
        instance.root_dir.join("logs").join("latest.log")
    }
}

#[async_trait]
impl LogSource for LatestLogFile {
    async fn recent_lines(&self, instance: &Instance, limit: usize) -> Vec<String> {
        let path = Self::path(instance);
        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "log unreadable");
                }
                return Vec::new();
            }
        };

        let lines: Vec<&str> = content.lines().collect();
        let skip = lines.len().saturating_sub(limit);
        lines[skip..].iter().map(|l| (*l).to_string()).collect()
    }

    async fn last_activity(&self, instance: &Instance) -> Option<DateTime<Utc>> {
        let meta = tokio::fs::metadata(Self::path(instance)).await.ok()?;
        meta.modified().ok().map(DateTime::<Utc>::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_tail_of_latest_log() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        tokio::fs::create_dir_all(&logs).await.unwrap();
        tokio::fs::write(logs.join("latest.log"), "one\ntwo\nthree\n")
            .await
            .unwrap();

        let instance = Instance::new("a", dir.path());
        let source = LatestLogFile;
        assert_eq!(source.recent_lines(&instance, 2).await, vec!["two", "three"]);
        assert!(source.last_activity(&instance).await.is_some());
    }

    #[tokio::test]
    async fn missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let instance = Instance::new("a", dir.path());
        assert!(LatestLogFile.recent_lines(&instance, 10).await.is_empty());
        assert!(LatestLogFile.last_activity(&instance).await.is_none());
    }
}
