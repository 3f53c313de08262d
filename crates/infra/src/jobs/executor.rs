//! Background executor: polls a [`JobStore`] and runs registered handlers.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::JobStore;
use super::types::{Job, JobResult, JobStatus};

const THREAD_NAME: &str = "etchforge-jobs";

pub type JobHandler = Box<dyn Fn(&Job) -> JobResult + Send + Sync>;

#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    pub poll_interval: Duration,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Controls a spawned executor thread.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl JobExecutorHandle {
    /// Stop polling and wait for the in-flight job to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Runs claimed jobs through the handler registered for their kind.
pub struct JobExecutor<S: JobStore> {
    store: S,
    handlers: HashMap<String, JobHandler>,
}

impl<S: JobStore + 'static> JobExecutor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for the kind whose type name is `type_name`.
    pub fn register_handler<F>(&mut self, type_name: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobResult + Send + Sync + 'static,
    {
        self.handlers.insert(type_name.into(), Box::new(handler));
    }

    pub fn spawn(self, config: JobExecutorConfig) -> std::io::Result<JobExecutorHandle>
    where
        S: Send,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || self.run(config, shutdown_rx))?;

        Ok(JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }

    /// Run one job that [`JobStore::claim_next`] has already marked running,
    /// and persist its outcome.
    pub fn execute_claimed(&self, job: &mut Job) -> Result<(), String> {
        let started = Utc::now();

        let result = match self.handlers.get(job.kind.type_name()) {
            Some(handler) => catch_unwind(AssertUnwindSafe(|| handler(job)))
                .unwrap_or_else(|_| JobResult::Fatal("job handler panicked".to_string())),
            None => JobResult::Fatal(format!("no handler for job kind {}", job.kind.type_name())),
        };

        match result {
            JobResult::Success => {
                job.mark_completed(started, Utc::now());
                self.store.update(job).map_err(|e| e.to_string())?;
                debug!(job_id = %job.id, tenant_id = %job.tenant_id, "job completed");
                Ok(())
            }
            JobResult::Failure(err) => self.fail(job, err, true, started),
            JobResult::Fatal(err) => self.fail(job, err, false, started),
        }
    }

    fn fail(
        &self,
        job: &mut Job,
        err: String,
        retryable: bool,
        started: chrono::DateTime<Utc>,
    ) -> Result<(), String> {
        job.mark_failed(err.clone(), retryable, started, Utc::now());

        if matches!(job.status, JobStatus::DeadLettered { .. }) {
            warn!(job_id = %job.id, tenant_id = %job.tenant_id, error = %err, attempts = job.attempt, "job dead-lettered");
        } else {
            debug!(job_id = %job.id, tenant_id = %job.tenant_id, error = %err, attempt = job.attempt, "job failed, retry scheduled");
        }
        self.store.update(job).map_err(|e| e.to_string())?;
        Err(err)
    }

    fn run(self, config: JobExecutorConfig, shutdown_rx: mpsc::Receiver<()>) {
        info!(executor = THREAD_NAME, "job executor started");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match self.store.claim_next(None, Utc::now()) {
                Ok(Some(mut job)) => {
                    debug!(executor = THREAD_NAME, job_id = %job.id, kind = job.kind.type_name(), "claimed job");
                    // Outcomes are persisted and logged by `execute_claimed`.
                    let _ = self.execute_claimed(&mut job);
                }
                Ok(None) => thread::sleep(config.poll_interval),
                Err(e) => {
                    error!(executor = THREAD_NAME, error = %e, "failed to claim job");
                    thread::sleep(config.poll_interval);
                }
            }
        }

        info!(executor = THREAD_NAME, "job executor stopped");
    }
}
