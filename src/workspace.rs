//! Per-job scratch storage with guaranteed release

use anyhow::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Short unique id for a job, derived from the input name and the current time
pub fn generate_job_id(file_name: &str) -> String {
    let now = chrono::Utc::now();
    let seed = format!(
        "{}:{}:{}",
        file_name,
        now.timestamp(),
        now.timestamp_subsec_nanos()
    );
    let digest = format!("{:x}", md5::compute(seed.as_bytes()));
    digest[..12].to_string()
}

/// Outcome of releasing a workspace
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    /// Paths still present after every retry
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Scratch directory `temp/<job_id>/` plus any external files the job took
/// ownership of
#[derive(Debug)]
pub struct JobWorkspace {
    job_id: String,
    dir: PathBuf,
    adopted: Vec<PathBuf>,
    retries: u32,
    retry_delay: Duration,
    released: bool,
}

impl JobWorkspace {
    pub async fn create(temp_root: &Path, job_id: &str, retries: u32, retry_delay: Duration) -> Result<Self> {
        let dir = temp_root.join(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        debug!("📁 Workspace {}", dir.display());

        Ok(Self {
            job_id: job_id.to_string(),
            dir,
            adopted: Vec::new(),
            retries: retries.max(1),
            retry_delay,
            released: false,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a scratch file inside the workspace
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Remove `path` together with the workspace
    pub fn adopt(&mut self, path: &Path) {
        self.adopted.push(path.to_path_buf());
    }

    /// Stop tracking `path`, keeping it on disk
    pub fn disown(&mut self, path: &Path) {
        self.adopted.retain(|p| p != path);
    }

    /// Remove every scratch and adopted file.
    ///
    /// Each removal is retried with a delay in case a just-closed media
    /// handle still holds the file. Leftovers are reported, not raised.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut targets: Vec<PathBuf> = WalkDir::new(&self.dir)
            .contents_first(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        targets.extend(self.adopted.iter().cloned());

        for path in targets {
            match remove_with_retries(&path, self.retries, self.retry_delay).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("⚠️ Could not remove {} after {} attempts: {}", path.display(), self.retries, e);
                    report.failed.push(path);
                }
            }
        }

        self.released = true;
        if report.is_complete() {
            info!("🧹 Cleaned workspace for job {} ({} entries)", self.job_id, report.removed);
        }
        report
    }
}

impl Drop for JobWorkspace {
    // The job future was dropped before cleanup ran
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("⚠️ Could not remove {}: {}", self.dir.display(), e);
            }
        }
        for path in &self.adopted {
            let _ = std::fs::remove_file(path);
        }
        debug!("Released abandoned workspace for job {}", self.job_id);
    }
}

/// Remove a file or empty directory, polling while the platform refuses.
///
/// Returns `Ok(false)` when the path was already gone.
async fn remove_with_retries(path: &Path, retries: u32, delay: Duration) -> std::io::Result<bool> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(path).await,
            Ok(_) => tokio::fs::remove_file(path).await,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) if attempt >= retries => return Err(e),
            Err(e) => {
                debug!("Retrying removal of {} ({}/{}): {}", path.display(), attempt, retries, e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_short_hex() {
        let a = generate_job_id("video.mp4");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_cleanup_removes_scratch_and_adopted_files() {
        let root = tempfile::tempdir().unwrap();
        let upload = root.path().join("upload.mp4");
        std::fs::write(&upload, b"video").unwrap();

        let mut ws = JobWorkspace::create(root.path(), "job1", 3, Duration::from_millis(1))
            .await
            .unwrap();
        std::fs::write(ws.path("audio.wav"), b"a").unwrap();
        std::fs::create_dir_all(ws.path("clips")).unwrap();
        std::fs::write(ws.path("clips/0.mp3"), b"b").unwrap();
        ws.adopt(&upload);

        let report = ws.cleanup().await;
        assert!(report.is_complete());
        assert!(!root.path().join("job1").exists());
        assert!(!upload.exists());
        assert_eq!(report.removed, 5);
    }

    #[tokio::test]
    async fn test_drop_releases_abandoned_workspace() {
        let root = tempfile::tempdir().unwrap();
        {
            let ws = JobWorkspace::create(root.path(), "job2", 1, Duration::ZERO)
                .await
                .unwrap();
            std::fs::write(ws.path("partial.wav"), b"a").unwrap();
        }
        assert!(!root.path().join("job2").exists());
    }

    #[tokio::test]
    async fn test_missing_paths_are_not_failures() {
        let root = tempfile::tempdir().unwrap();
        let mut ws = JobWorkspace::create(root.path(), "job3", 2, Duration::ZERO)
            .await
            .unwrap();
        ws.adopt(&root.path().join("never-written.mp4"));
        let report = ws.cleanup().await;
        assert!(report.is_complete());
        assert_eq!(report.removed, 1);
    }
}
