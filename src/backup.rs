//! Backup collaborator invoked by scheduled `backup` jobs.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::{error::BackupError, instance::Instance};

#[async_trait]
pub trait BackupService: Send + Sync {
    /// Archives the instance and returns the path of the written backup.
    async fn backup(&self, instance: &Instance) -> Result<PathBuf, BackupError>;
}

#[cfg(feature = "backup")]
pub use zip_backup::ZipBackup;

#[cfg(feature = "backup")]
mod zip_backup {
    use std::{
        fs::File,
        io,
        path::{Path, PathBuf},
        sync::Arc,
    };

    use async_trait::async_trait;
    use chrono::Local;
    use tracing::{info, warn};
    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use super::BackupService;
    use crate::{error::BackupError, instance::Instance, supervisor::ProcessSupervisor};

    /// Zips the instance root into `<directory>/<instance>-<timestamp>.zip`.
    /// World saving is paused around the archive when the server is up.
    pub struct ZipBackup {
        directory: PathBuf,
        supervisor: Option<Arc<ProcessSupervisor>>,
    }

    impl ZipBackup {
        pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
            Self {
                directory: directory.into(),
                supervisor: None,
            }
        }

        pub fn with_supervisor(mut self, supervisor: Arc<ProcessSupervisor>) -> Self {
            self.supervisor = Some(supervisor);
            self
        }

        async fn console(&self, instance: &str, command: &str) -> bool {
            let Some(supervisor) = &self.supervisor else {
                return false;
            };
            match supervisor.send_command(instance, command).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(instance, command, error = %e, "console command skipped");
                    false
                }
            }
        }
    }

    #[async_trait]
    impl BackupService for ZipBackup {
        async fn backup(&self, instance: &Instance) -> Result<PathBuf, BackupError> {
            tokio::fs::create_dir_all(&self.directory)
                .await
                .map_err(|source| BackupError::Io {
                    path: self.directory.clone(),
                    source,
                })?;

            let stamp = Local::now().format("%Y%m%d-%H%M%S");
            let target = self.directory.join(format!("{}-{stamp}.zip", instance.name));

            let paused = self.console(&instance.name, "save-off").await;
            if paused {
                self.console(&instance.name, "save-all flush").await;
            }

            let root = instance.root_dir.clone();
            let exclude = self.directory.clone();
            let out = target.clone();
            let result = tokio::task::spawn_blocking(move || write_archive(&root, &exclude, &out))
                .await
                .map_err(|_| BackupError::Aborted)
                .and_then(|r| r);

            if paused && !self.console(&instance.name, "save-on").await {
                warn!(instance = %instance.name, "could not re-enable world saving");
            }

            let files = result?;
            info!(instance = %instance.name, path = %target.display(), files, "backup written");
            Ok(target)
        }
    }

    fn write_archive(root: &Path, exclude: &Path, target: &Path) -> Result<usize, BackupError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| BackupError::Io { path, source }
        };

        let partial = target.with_extension("zip.partial");
        let file = File::create(&partial).map_err(io_err(&partial))?;
        let count = match fill_archive(file, root, exclude, &partial) {
            Ok(count) => count,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e);
            }
        };
        std::fs::rename(&partial, target).map_err(io_err(target))?;
        Ok(count)
    }

    fn fill_archive(
        file: File,
        root: &Path,
        exclude: &Path,
        partial: &Path,
    ) -> Result<usize, BackupError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| BackupError::Io { path, source }
        };

        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut count = 0;
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))?.flatten() {
                let path = entry.path();
                if path.starts_with(exclude) || path == partial {
                    continue;
                }
                let Ok(kind) = entry.file_type() else {
                    continue;
                };
                if kind.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !kind.is_file() {
                    continue;
                }

                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                let mut source = match File::open(&path) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable file");
                        continue;
                    }
                };
                zip.start_file(name, options)?;
                io::copy(&mut source, &mut zip).map_err(io_err(&path))?;
                count += 1;
            }
        }

        zip.finish()?;
        Ok(count)
    }

    #[cfg(test)]
    mod tests {
        use std::io::Read;

        use super::*;

        #[tokio::test]
        async fn archives_root_excluding_backup_directory() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("survival");
            std::fs::create_dir_all(root.join("world/region")).unwrap();
            std::fs::write(root.join("server.properties"), "motd=hi\n").unwrap();
            std::fs::write(root.join("world/region/r.0.0.mca"), b"region").unwrap();
            let backups = root.join("backups");
            std::fs::create_dir_all(&backups).unwrap();
            std::fs::write(backups.join("old.zip"), b"old").unwrap();

            let service = ZipBackup::new(&backups);
            let path = service
                .backup(&Instance::new("survival", &root))
                .await
                .unwrap();
            assert!(path.starts_with(&backups));

            let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
            let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
            names.sort();
            assert_eq!(names, vec!["server.properties", "world/region/r.0.0.mca"]);

            let mut content = String::new();
            archive
                .by_name("server.properties")
                .unwrap()
                .read_to_string(&mut content)
                .unwrap();
            assert_eq!(content, "motd=hi\n");
        }

        #[tokio::test]
        async fn failed_archive_leaves_no_partial_file() {
            let dir = tempfile::tempdir().unwrap();
            let backups = dir.path().join("backups");

            let service = ZipBackup::new(&backups);
            let err = service
                .backup(&Instance::new("gone", dir.path().join("missing")))
                .await
                .unwrap_err();
            assert!(matches!(err, BackupError::Io { .. }));
            assert_eq!(std::fs::read_dir(&backups).unwrap().count(), 0);
        }
    }
}
