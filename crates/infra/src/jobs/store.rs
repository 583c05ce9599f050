//! Job storage.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ordo_core::JobId;
use parking_lot::RwLock;
use serde::Serialize;

use super::types::{JobData, JobError, JobFilter, JobStatus};

/// Job store abstraction.
///
/// Implementations must make `claim_next` and `cancel` atomic with respect
/// to each other: a job is either claimed or cancelled, never both.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: JobData) -> Result<(), JobError>;

    fn get(&self, id: JobId) -> Option<JobData>;

    /// Replace a stored job with `job`.
    fn update(&self, job: &JobData) -> Result<(), JobError>;

    /// Move the best pending job to `Processing` and return it.
    ///
    /// Best is highest priority, then earliest `created_at`.
    fn claim_next(&self) -> Option<JobData>;

    /// Fail a pending job as cancelled. Returns false for any other status.
    fn cancel(&self, id: JobId, reason: &str) -> Result<bool, JobError>;

    /// Matching jobs, highest priority first, then oldest first.
    fn list(&self, filter: &JobFilter) -> Vec<JobData>;

    fn counts(&self) -> JobCounts;

    /// Drop terminal jobs that finished before `cutoff`; returns how many.
    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize;
}

/// Number of stored jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub total: usize,
}

/// In-memory job table.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobData>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn dispatch_order(a: &JobData, b: &JobData) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
        .then(a.id.as_uuid().cmp(b.id.as_uuid()))
}

impl JobStore for InMemoryJobStore {
    fn insert(&self, job: JobData) -> Result<(), JobError> {
        self.jobs.write().insert(job.id, job);
        Ok(())
    }

    fn get(&self, id: JobId) -> Option<JobData> {
        self.jobs.read().get(&id).cloned()
    }

    fn update(&self, job: &JobData) -> Result<(), JobError> {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(JobError::NotFound(job.id)),
        }
    }

    fn claim_next(&self) -> Option<JobData> {
        let mut jobs = self.jobs.write();
        let next_id = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by(|a, b| dispatch_order(a, b))
            .map(|j| j.id)?;

        let job = jobs.get_mut(&next_id)?;
        job.transition(JobStatus::Processing).ok()?;
        Some(job.clone())
    }

    fn cancel(&self, id: JobId, reason: &str) -> Result<bool, JobError> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.transition(JobStatus::Failed)?;
        job.error = Some(reason.to_string());
        Ok(true)
    }

    fn list(&self, filter: &JobFilter) -> Vec<JobData> {
        let mut result: Vec<JobData> = self
            .jobs
            .read()
            .values()
            .filter(|j| filter.matches(j))
            .cloned()
            .collect();
        result.sort_by(dispatch_order);
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        result
    }

    fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read();
        let mut counts = JobCounts {
            total: jobs.len(),
            ..JobCounts::default()
        };
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Retrying => counts.retrying += 1,
            }
        }
        counts
    }

    fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, j| {
            !(j.status.is_terminal() && j.completed_at.is_some_and(|at| at < cutoff))
        });
        before - jobs.len()
    }
}
