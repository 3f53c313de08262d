//! Job persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use etchforge_core::TenantId;

use super::types::{Job, JobId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job store lock poisoned")]
    Poisoned,
}

/// Queue of background jobs.
///
/// Lookups are tenant-scoped: a job of another tenant is reported as not found.
/// Dead-lettered jobs stay in the queue with their final status and attempt
/// history; they are never claimed again.
pub trait JobStore: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError>;

    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Oldest claimable job that is ready at `now`, already marked running.
    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| JobStoreError::Poisoned)?;
        jobs.get(&job_id)
            .filter(|job| job.tenant_id == tenant_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| JobStoreError::Poisoned)?;

        let next = jobs
            .values()
            .filter(|j| {
                j.status.is_claimable()
                    && j.is_ready(now)
                    && tenant_id.is_none_or(|t| j.tenant_id == t)
            })
            .min_by_key(|j| (j.created_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(now);
                job.clone()
            })
        }))
    }
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(tenant_id, job_id)
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_next(
        &self,
        tenant_id: Option<TenantId>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(tenant_id, now)
    }
}
