//! Background jobs with retry, backoff and dead-lettering.
//!
//! Jobs are tenant-scoped. A [`JobExecutor`] thread claims ready jobs from a
//! [`JobStore`], routes them to the handler registered for their kind and
//! records the outcome: completed, failed with a scheduled retry, or
//! dead-lettered once the [`RetryPolicy`] is spent. A dead-lettered job keeps
//! its error and attempt history on the job record.

pub mod executor;
pub mod store;
pub mod types;

pub use executor::{JobExecutor, JobExecutorConfig, JobExecutorHandle};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobAttempt, JobId, JobKind, JobResult, JobStatus, RetryPolicy};
