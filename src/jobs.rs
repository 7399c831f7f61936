//! In-memory job records with TTL sweep from completion (C10).

use crate::models::{DownloadParams, Job, JobState};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{info, instrument};
use uuid::Uuid;

/// Owns every `Job` record. Every other component holds only job IDs.
pub struct JobStore {
    jobs: RwLock<HashMap<String, Job>>,
    /// Output paths currently being produced by live jobs; guarded under
    /// the same lock as the job map since both are mutated by workers in
    /// lockstep.
    active_files: RwLock<HashSet<String>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            active_files: RwLock::new(HashSet::new()),
        }
    }

    pub async fn create(&self, url: String, params: DownloadParams) -> Job {
        let id = Uuid::new_v4().to_string();
        let job = Job::new(id.clone(), url, params);
        self.jobs.write().await.insert(id, job.clone());
        job
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Exclusive read-modify-write, applied by the worker that owns the
    /// job. `mutator` receives `&mut Job` and is expected to only ever be
    /// called by the single worker processing that job.
    pub async fn update(&self, id: &str, mutator: impl FnOnce(&mut Job)) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            mutator(job);
        }
    }

    pub async fn mark_active_file(&self, relative_path: &str) {
        self.active_files.write().await.insert(relative_path.to_string());
    }

    pub async fn unmark_active_file(&self, relative_path: &str) {
        self.active_files.write().await.remove(relative_path);
    }

    pub async fn is_active_file(&self, relative_path: &str) -> bool {
        self.active_files.read().await.contains(relative_path)
    }

    pub async fn active_file_snapshot(&self) -> HashSet<String> {
        self.active_files.read().await.clone()
    }

    /// Snapshot count of jobs per state, for the `/metrics` exposition.
    pub async fn counts_by_state(&self) -> Vec<(&'static str, usize)> {
        let jobs = self.jobs.read().await;
        let mut pending = 0;
        let mut processing = 0;
        let mut retrying = 0;
        let mut completed = 0;
        let mut failed = 0;
        for job in jobs.values() {
            match job.state {
                JobState::Pending => pending += 1,
                JobState::Processing => processing += 1,
                JobState::Retrying => retrying += 1,
                JobState::Completed => completed += 1,
                JobState::Failed => failed += 1,
            }
        }
        vec![
            ("PENDING", pending),
            ("PROCESSING", processing),
            ("RETRYING", retrying),
            ("COMPLETED", completed),
            ("FAILED", failed),
        ]
    }

    /// Removes records whose `completed_at + job_ttl` has elapsed. Records
    /// still in flight (no `completed_at`) are never removed, regardless
    /// of age.
    #[instrument(skip(self))]
    pub async fn sweep_expired(&self, job_ttl: ChronoDuration) -> usize {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| match job.completed_at {
            Some(completed_at) => now - completed_at < job_ttl,
            None => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            info!(removed, "swept expired job records");
        }
        removed
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DownloadParams;

    fn params() -> DownloadParams {
        DownloadParams {
            url: "https://youtube.com/watch?v=abc".to_string(),
            format_id: None,
            output_template: None,
            audio_only: false,
            audio_format: None,
            audio_quality: None,
            subtitles: false,
            subtitle_lang: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_pending_state() {
        let store = JobStore::new();
        let job = store.create("https://x".to_string(), params()).await;
        assert_eq!(job.state, JobState::Pending);
        assert!(store.get(&job.id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_never_removes_jobs_without_completed_at() {
        let store = JobStore::new();
        let job = store.create("https://x".to_string(), params()).await;
        store.update(&job.id, |j| j.state = JobState::Processing).await;
        let removed = store.sweep_expired(ChronoDuration::seconds(0)).await;
        assert_eq!(removed, 0);
        assert!(store.get(&job.id).await.is_some());
    }

    #[tokio::test]
    async fn sweep_removes_completed_jobs_past_ttl() {
        let store = JobStore::new();
        let job = store.create("https://x".to_string(), params()).await;
        store
            .update(&job.id, |j| {
                j.state = JobState::Completed;
                j.completed_at = Some(Utc::now() - ChronoDuration::hours(48));
            })
            .await;
        let removed = store.sweep_expired(ChronoDuration::hours(24)).await;
        assert_eq!(removed, 1);
        assert!(store.get(&job.id).await.is_none());
    }

    #[tokio::test]
    async fn active_file_set_tracks_membership() {
        let store = JobStore::new();
        store.mark_active_file("video.mp4").await;
        assert!(store.is_active_file("video.mp4").await);
        store.unmark_active_file("video.mp4").await;
        assert!(!store.is_active_file("video.mp4").await);
    }
}
