use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{DubbingError, ErrorKind};

/// Lifecycle of a dubbing job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStage {
    Uploaded,
    AudioExtracted,
    Transcribed,
    /// Per-segment synthesis, `completed` of `total` done
    Synthesizing { completed: usize, total: usize },
    Reconciled,
    Assembled,
    Composited,
    Rendered,
    Cleaned,
    /// Terminal failure, naming the stage that was running
    Failed { stage: String, message: String },
}

impl JobStage {
    pub fn name(&self) -> &'static str {
        match self {
            JobStage::Uploaded => "uploaded",
            JobStage::AudioExtracted => "audio_extracted",
            JobStage::Transcribed => "transcribed",
            JobStage::Synthesizing { .. } => "synthesizing",
            JobStage::Reconciled => "reconciled",
            JobStage::Assembled => "assembled",
            JobStage::Composited => "composited",
            JobStage::Rendered => "rendered",
            JobStage::Cleaned => "cleaned",
            JobStage::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Cleaned | JobStage::Failed { .. })
    }

    /// Whether the machine may move from `self` to `next`
    pub fn can_advance_to(&self, next: &JobStage) -> bool {
        use JobStage::*;
        match (self, next) {
            (Failed { .. }, _) | (Cleaned, _) => false,
            (_, Failed { .. }) => true,
            (Uploaded, AudioExtracted) => true,
            (AudioExtracted, Transcribed) => true,
            (Transcribed, Synthesizing { completed: 0, .. }) => true,
            (
                Synthesizing { completed: done, total },
                Synthesizing { completed: next_done, total: next_total },
            ) => total == next_total && *next_done == done + 1 && next_done <= next_total,
            (Synthesizing { completed, total }, Reconciled) => completed == total,
            (Reconciled, Assembled) => true,
            (Assembled, Composited) => true,
            (Composited, Rendered) => true,
            (Rendered, Cleaned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStage::Synthesizing { completed, total } => {
                write!(f, "synthesizing ({}/{})", completed, total)
            }
            JobStage::Failed { stage, message } => write!(f, "failed during {}: {}", stage, message),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal job transition from {from} to {to}")]
pub struct IllegalTransition {
    pub from: String,
    pub to: String,
}

/// The error surfaced at the job boundary
#[derive(thiserror::Error, Debug)]
#[error("Job {job_id} failed during {stage}: {error}")]
pub struct JobFailure {
    pub job_id: String,
    pub stage: String,
    #[source]
    pub error: DubbingError,
}

impl JobFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Time spent reaching a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub at: DateTime<Utc>,
    pub elapsed_seconds: f64,
}

/// Progress record for a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub input_name: String,
    pub target_language: Option<String>,
    pub stage: JobStage,
    pub history: Vec<StageRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Download name of the rendered video
    pub output: Option<String>,
    /// Temporary paths that survived cleanup
    #[serde(default)]
    pub cleanup_failures: Vec<PathBuf>,
}

impl JobState {
    pub fn new(job_id: &str, input_name: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            input_name: input_name.to_string(),
            target_language: None,
            stage: JobStage::Uploaded,
            history: vec![StageRecord {
                stage: JobStage::Uploaded.name().to_string(),
                at: now,
                elapsed_seconds: 0.0,
            }],
            created_at: now,
            updated_at: now,
            output: None,
            cleanup_failures: Vec::new(),
        }
    }

    /// Move to `next`, refusing transitions the lifecycle does not allow
    pub fn advance(&mut self, next: JobStage) -> std::result::Result<(), IllegalTransition> {
        if !self.stage.can_advance_to(&next) {
            return Err(IllegalTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        // Per-segment ticks update progress without adding history rows
        let is_tick = matches!(
            (&self.stage, &next),
            (JobStage::Synthesizing { .. }, JobStage::Synthesizing { .. })
        );
        if !is_tick {
            let elapsed = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
            self.history.push(StageRecord {
                stage: next.name().to_string(),
                at: now,
                elapsed_seconds: elapsed,
            });
            self.updated_at = now;
        }
        self.stage = next;
        Ok(())
    }

    /// Enter the terminal failed state, naming the stage that was running
    pub fn fail(&mut self, stage: &str, message: &str) {
        if let Err(e) = self.advance(JobStage::Failed {
            stage: stage.to_string(),
            message: message.to_string(),
        }) {
            warn!("{}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn total_seconds(&self) -> f64 {
        (self.updated_at - self.created_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Job registry counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Finished jobs kept when no limit is configured
pub const DEFAULT_MAX_FINISHED_JOBS: usize = 500;

/// Shared view of running jobs and the most recent finished ones
#[derive(Debug, Clone)]
pub struct JobRegistry {
    /// Optional directory for JSON job records
    state_dir: Option<PathBuf>,

    /// Finished jobs beyond this count are forgotten, oldest first
    max_finished: usize,

    /// In-memory state cache (thread-safe)
    jobs: Arc<RwLock<HashMap<String, JobState>>>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self {
            state_dir: None,
            max_finished: DEFAULT_MAX_FINISHED_JOBS,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl JobRegistry {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a registry persisted under `state_dir`, loading earlier records
    pub async fn persistent(state_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&state_dir).await?;

        let registry = Self {
            state_dir: Some(state_dir),
            ..Self::default()
        };
        registry.load_existing_states().await?;
        registry.prune_finished().await;

        let count = registry.jobs.read().await.len();
        info!("📊 Job registry initialized with {} records", count);
        Ok(registry)
    }

    /// Keep at most `max_finished` finished jobs
    pub fn with_max_finished(mut self, max_finished: usize) -> Self {
        self.max_finished = max_finished;
        self
    }

    async fn load_existing_states(&self) -> Result<()> {
        let Some(dir) = &self.state_dir else {
            return Ok(());
        };

        let mut entries = fs::read_dir(dir).await?;
        let mut loaded_count = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                match Self::load_state_file(&path).await {
                    Ok(mut state) => {
                        // Nothing is driving a job left over from an earlier run
                        if !state.is_finished() {
                            warn!("⚠️ Job {} was interrupted at {}", state.job_id, state.stage);
                            state.fail("interrupted", "the service stopped before the job finished");
                            self.save_state_to_disk(&state).await;
                        }
                        self.jobs.write().await.insert(state.job_id.clone(), state);
                        loaded_count += 1;
                    }
                    Err(e) => {
                        warn!("Failed to load job record {}: {}", path.display(), e);
                    }
                }
            }
        }

        debug!("📁 Loaded {} job records from disk", loaded_count);
        Ok(())
    }

    async fn load_state_file(path: &Path) -> Result<JobState> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_state_to_disk(&self, state: &JobState) {
        let Some(dir) = &self.state_dir else {
            return;
        };
        let path = dir.join(format!("{}.json", state.job_id));
        let result = match serde_json::to_string_pretty(state) {
            Ok(json) => fs::write(&path, json).await.map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to persist job {}: {}", state.job_id, e);
        }
    }

    pub async fn insert(&self, state: JobState) {
        self.save_state_to_disk(&state).await;
        self.jobs.write().await.insert(state.job_id.clone(), state);
        self.prune_finished().await;
    }

    /// Forget the oldest finished jobs beyond the retention limit
    async fn prune_finished(&self) {
        let evicted: Vec<String> = {
            let mut jobs = self.jobs.write().await;
            let mut finished: Vec<(DateTime<Utc>, String)> = jobs
                .values()
                .filter(|j| j.is_finished())
                .map(|j| (j.updated_at, j.job_id.clone()))
                .collect();
            if finished.len() <= self.max_finished {
                return;
            }
            finished.sort();
            let excess = finished.len() - self.max_finished;
            finished
                .into_iter()
                .take(excess)
                .map(|(_, id)| {
                    jobs.remove(&id);
                    id
                })
                .collect()
        };

        debug!("🧹 Evicted {} finished job records", evicted.len());
        if let Some(dir) = &self.state_dir {
            for id in &evicted {
                if let Err(e) = fs::remove_file(dir.join(format!("{}.json", id))).await {
                    debug!("Job record {} not removed: {}", id, e);
                }
            }
        }
    }

    /// Apply `f` to a job's record and persist the result
    pub async fn update<F, T>(&self, job_id: &str, f: F) -> Option<T>
    where
        F: FnOnce(&mut JobState) -> T,
    {
        let snapshot;
        let out;
        {
            let mut jobs = self.jobs.write().await;
            let state = jobs.get_mut(job_id)?;
            out = f(state);
            snapshot = state.clone();
        }
        self.save_state_to_disk(&snapshot).await;
        Some(out)
    }

    pub async fn get(&self, job_id: &str) -> Option<JobState> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// All jobs, newest first
    pub async fn list(&self) -> Vec<JobState> {
        let mut jobs: Vec<JobState> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        let mut stats = JobStats {
            total: jobs.len(),
            ..JobStats::default()
        };
        for job in jobs.values() {
            match job.stage {
                JobStage::Cleaned => stats.completed += 1,
                JobStage::Failed { .. } => stats.failed += 1,
                _ => stats.running += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_to_rendered(state: &mut JobState, segments: usize) {
        state.advance(JobStage::AudioExtracted).unwrap();
        state.advance(JobStage::Transcribed).unwrap();
        state.advance(JobStage::Synthesizing { completed: 0, total: segments }).unwrap();
        for i in 1..=segments {
            state.advance(JobStage::Synthesizing { completed: i, total: segments }).unwrap();
        }
        state.advance(JobStage::Reconciled).unwrap();
        state.advance(JobStage::Assembled).unwrap();
        state.advance(JobStage::Composited).unwrap();
        state.advance(JobStage::Rendered).unwrap();
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = JobState::new("abc", "in.mp4");
        walk_to_rendered(&mut state, 3);
        state.advance(JobStage::Cleaned).unwrap();

        assert!(state.is_finished());
        let names: Vec<&str> = state.history.iter().map(|r| r.stage.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "uploaded", "audio_extracted", "transcribed", "synthesizing", "reconciled",
                "assembled", "composited", "rendered", "cleaned"
            ]
        );
    }

    #[test]
    fn test_illegal_transitions_are_refused() {
        let mut state = JobState::new("abc", "in.mp4");
        assert!(state.advance(JobStage::Rendered).is_err());
        assert!(state.advance(JobStage::Transcribed).is_err());

        state.advance(JobStage::AudioExtracted).unwrap();
        state.advance(JobStage::Transcribed).unwrap();
        state.advance(JobStage::Synthesizing { completed: 0, total: 2 }).unwrap();
        // Cannot reconcile before every segment is synthesized
        assert!(state.advance(JobStage::Reconciled).is_err());
        assert!(state.advance(JobStage::Synthesizing { completed: 2, total: 2 }).is_err());
    }

    #[test]
    fn test_failure_is_terminal_and_names_stage() {
        let mut state = JobState::new("abc", "in.mp4");
        state.advance(JobStage::AudioExtracted).unwrap();
        state.fail("transcription", "whisper crashed");

        assert_eq!(
            state.stage,
            JobStage::Failed {
                stage: "transcription".to_string(),
                message: "whisper crashed".to_string()
            }
        );
        assert!(state.advance(JobStage::Transcribed).is_err());
        assert!(state.advance(JobStage::Cleaned).is_err());
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_value(JobStage::Synthesizing { completed: 1, total: 4 }).unwrap();
        assert_eq!(json["status"], "synthesizing");
        assert_eq!(json["completed"], 1);
    }

    #[tokio::test]
    async fn test_registry_update_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::persistent(dir.path().to_path_buf()).await.unwrap();

        registry.insert(JobState::new("job-a", "a.mp4")).await;
        registry.insert(JobState::new("job-b", "b.mp4")).await;
        registry
            .update("job-b", |s| s.fail("render", "boom"))
            .await
            .unwrap();
        assert!(registry.update("missing", |_| ()).await.is_none());

        let stats = registry.stats().await;
        assert_eq!((stats.total, stats.running, stats.failed), (2, 1, 1));

        let reloaded = JobRegistry::persistent(dir.path().to_path_buf()).await.unwrap();
        let job_b = reloaded.get("job-b").await.unwrap();
        assert_eq!(job_b.stage.name(), "failed");
        assert_eq!(reloaded.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_reloaded_unfinished_job_is_failed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::persistent(dir.path().to_path_buf()).await.unwrap();
        registry.insert(JobState::new("job-a", "a.mp4")).await;
        registry
            .update("job-a", |s| s.advance(JobStage::AudioExtracted))
            .await
            .unwrap()
            .unwrap();

        let reloaded = JobRegistry::persistent(dir.path().to_path_buf()).await.unwrap();
        let job_a = reloaded.get("job-a").await.unwrap();
        assert!(matches!(job_a.stage, JobStage::Failed { ref stage, .. } if stage == "interrupted"));
        let stats = reloaded.stats().await;
        assert_eq!((stats.running, stats.failed), (0, 1));

        // The failure was written back
        let again = JobRegistry::persistent(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(again.get("job-a").await.unwrap().stage.name(), "failed");
    }

    #[tokio::test]
    async fn test_oldest_finished_jobs_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = JobRegistry::persistent(dir.path().to_path_buf())
            .await
            .unwrap()
            .with_max_finished(2);

        for id in ["j1", "j2", "j3"] {
            registry.insert(JobState::new(id, "v.mp4")).await;
            registry.update(id, |s| s.fail("render", "boom")).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        // A running job is never evicted
        registry.insert(JobState::new("live", "v.mp4")).await;

        assert!(registry.get("j1").await.is_none());
        assert!(registry.get("j3").await.is_some());
        assert!(registry.get("live").await.is_some());
        assert_eq!(registry.stats().await.total, 3);
        assert!(!dir.path().join("j1.json").exists());
    }
}
