use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::RegexSet;

use crate::{config::CrashMonitorSettings, supervisor::ExitObservation};

use super::CrashType;

/// Everything known about a death at classification time.
#[derive(Debug, Clone)]
pub struct CrashContext {
    pub observation: ExitObservation,
    /// Captured console tail followed by the log file tail.
    pub lines: Vec<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub crash_type: CrashType,
    pub details: Option<String>,
}

/// One strategy in the classification chain. Returning `None` defers to
/// the next classifier.
#[async_trait]
pub trait CrashClassifier: Send + Sync {
    async fn classify(&self, ctx: &CrashContext) -> Option<Classification>;
}

/// A file in `crash-reports/` written after the process started.
#[derive(Debug, Clone, Default)]
pub struct CrashReportClassifier;

#[async_trait]
impl CrashClassifier for CrashReportClassifier {
    async fn classify(&self, ctx: &CrashContext) -> Option<Classification> {
        let dir = ctx.observation.instance.root_dir.join("crash-reports");
        let mut entries = tokio::fs::read_dir(&dir).await.ok()?;

        let mut newest: Option<(DateTime<Utc>, String)> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = meta.modified().map(DateTime::<Utc>::from) else {
                continue;
            };
            if !meta.is_file() || modified < ctx.observation.started_at {
                continue;
            }
            if newest.as_ref().is_none_or(|(at, _)| modified > *at) {
                newest = Some((modified, entry.file_name().to_string_lossy().into_owned()));
            }
        }

        newest.map(|(_, file)| Classification {
            crash_type: CrashType::CrashReport,
            details: Some(format!("crash-reports/{file}")),
        })
    }
}

/// Matches recent lines against a configurable set of OOM signatures.
#[derive(Debug, Clone)]
pub struct OutOfMemoryClassifier {
    patterns: RegexSet,
}

impl OutOfMemoryClassifier {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            patterns: RegexSet::new(patterns)?,
        })
    }
}

#[async_trait]
impl CrashClassifier for OutOfMemoryClassifier {
    async fn classify(&self, ctx: &CrashContext) -> Option<Classification> {
        ctx.lines
            .iter()
            .rev()
            .find(|line| self.patterns.is_match(line))
            .map(|line| Classification {
                crash_type: CrashType::OutOfMemory,
                details: Some(line.trim().to_string()),
            })
    }
}

/// No log activity for longer than `threshold` before the death was seen.
#[derive(Debug, Clone)]
pub struct TimeoutClassifier {
    threshold: Duration,
}

impl TimeoutClassifier {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

#[async_trait]
impl CrashClassifier for TimeoutClassifier {
    async fn classify(&self, ctx: &CrashContext) -> Option<Classification> {
        let last = ctx.last_activity.unwrap_or(ctx.observation.started_at);
        let silent = (ctx.detected_at - last).to_std().ok()?;
        (silent > self.threshold).then(|| Classification {
            crash_type: CrashType::Timeout,
            details: Some(format!("no log activity for {}s", silent.as_secs())),
        })
    }
}

/// Crash report, then OOM signature, then heartbeat timeout when enabled.
pub fn default_chain(
    settings: &CrashMonitorSettings,
) -> Result<Vec<Box<dyn CrashClassifier>>, regex::Error> {
    let mut chain: Vec<Box<dyn CrashClassifier>> = vec![
        Box::new(CrashReportClassifier),
        Box::new(OutOfMemoryClassifier::new(&settings.oom_patterns)?),
    ];
    if let Some(secs) = settings.heartbeat_timeout_secs {
        chain.push(Box::new(TimeoutClassifier::new(Duration::from_secs(secs))));
    }
    Ok(chain)
}

/// First classifier to answer wins; otherwise ProcessDeath with the exit
/// status.
pub async fn classify(chain: &[Box<dyn CrashClassifier>], ctx: &CrashContext) -> Classification {
    for classifier in chain {
        if let Some(found) = classifier.classify(ctx).await {
            return found;
        }
    }
    Classification {
        crash_type: CrashType::ProcessDeath,
        details: ctx.observation.exit.map(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::instance::{ExitInfo, Instance};

    fn context(root: &std::path::Path, lines: &[&str]) -> CrashContext {
        let now = Utc::now();
        CrashContext {
            observation: ExitObservation {
                instance: Instance::new("a", root),
                pid: 100,
                session_id: "s".into(),
                started_at: now - ChronoDuration::minutes(5),
                exit: Some(ExitInfo {
                    code: Some(1),
                    signal: None,
                }),
                recent_output: Vec::new(),
                last_output_at: None,
            },
            lines: lines.iter().map(|l| l.to_string()).collect(),
            last_activity: Some(now),
            detected_at: now,
        }
    }

    fn chain() -> Vec<Box<dyn CrashClassifier>> {
        default_chain(&CrashMonitorSettings::default()).unwrap()
    }

    #[tokio::test]
    async fn falls_back_to_process_death_with_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), &["[Server thread/INFO]: Done (3.2s)!"]);
        assert_eq!(
            classify(&chain(), &ctx).await,
            Classification {
                crash_type: CrashType::ProcessDeath,
                details: Some("exit code 1".into()),
            }
        );
    }

    #[tokio::test]
    async fn out_of_memory_signature() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            dir.path(),
            &[
                "[Server thread/INFO]: Saving chunks",
                "Exception in thread \"main\" java.lang.OutOfMemoryError: Java heap space",
            ],
        );
        let found = classify(&chain(), &ctx).await;
        assert_eq!(found.crash_type, CrashType::OutOfMemory);
        assert!(found.details.unwrap().contains("Java heap space"));
    }

    #[tokio::test]
    async fn fresh_crash_report_wins_over_oom() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("crash-reports");
        tokio::fs::create_dir_all(&reports).await.unwrap();
        tokio::fs::write(reports.join("crash-2026-10-14_04.00.00-server.txt"), "boom")
            .await
            .unwrap();

        let ctx = context(dir.path(), &["java.lang.OutOfMemoryError"]);
        let found = classify(&chain(), &ctx).await;
        assert_eq!(found.crash_type, CrashType::CrashReport);
        assert_eq!(
            found.details.as_deref(),
            Some("crash-reports/crash-2026-10-14_04.00.00-server.txt")
        );
    }

    #[tokio::test]
    async fn stale_crash_report_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("crash-reports");
        tokio::fs::create_dir_all(&reports).await.unwrap();
        tokio::fs::write(reports.join("old.txt"), "old").await.unwrap();

        let mut ctx = context(dir.path(), &[]);
        ctx.observation.started_at = Utc::now() + ChronoDuration::minutes(1);
        assert!(CrashReportClassifier.classify(&ctx).await.is_none());
    }

    #[tokio::test]
    async fn heartbeat_timeout_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), &[]);
        ctx.last_activity = Some(ctx.detected_at - ChronoDuration::minutes(3));

        assert_eq!(
            classify(&chain(), &ctx).await.crash_type,
            CrashType::ProcessDeath
        );

        let settings = CrashMonitorSettings {
            heartbeat_timeout_secs: Some(60),
            ..Default::default()
        };
        let chain = default_chain(&settings).unwrap();
        assert_eq!(classify(&chain, &ctx).await.crash_type, CrashType::Timeout);
    }
}
