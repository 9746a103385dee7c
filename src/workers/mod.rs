use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::{
    jobs::{ensure_scheduled, finish_job, reserve_job, JobQueueError, JobStatus, Outcome},
    models::Job,
    state::AppState,
};

pub mod reminders;

#[derive(Debug)]
pub enum JobExecution {
    Success,
    Retry { delay: Duration, error: String },
    Failed { error: String },
}

impl JobExecution {
    fn outcome(&self) -> Outcome<'_> {
        match self {
            JobExecution::Success => Outcome::Succeeded,
            JobExecution::Retry { delay, error } => Outcome::RetryAfter(*delay, error),
            JobExecution::Failed { error } => Outcome::Failed(error),
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    fn job_type(&self) -> &'static str;
    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution;

    /// Recurring handlers always keep one queued run; the worker seeds it on
    /// start and after a permanent failure.
    fn recurring(&self) -> bool {
        false
    }
}

pub struct Worker {
    state: Arc<AppState>,
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        state: Arc<AppState>,
        handlers: Vec<Arc<dyn JobHandler>>,
        poll_interval: Duration,
    ) -> Self {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.job_type(), handler))
            .collect();
        Self {
            state,
            handlers,
            poll_interval,
        }
    }

    pub fn seed_recurring(&self) -> Result<(), JobQueueError> {
        let recurring = self.handlers.values().filter(|handler| handler.recurring());
        let mut conn = match self.state.db() {
            Ok(conn) => conn,
            Err(err) => {
                error!(?err, "no database connection to seed recurring jobs");
                return Ok(());
            }
        };

        for handler in recurring {
            if let Some(job) = ensure_scheduled(&mut conn, handler.job_type(), None)? {
                info!(job_id = %job.id, job_type = %job.job_type, "seeded recurring job");
            }
        }
        Ok(())
    }

    pub async fn run(&self) {
        info!(handlers = self.handlers.len(), "worker started");
        if let Err(err) = self.seed_recurring() {
            error!(error = %err, "failed to seed recurring jobs");
        }
        loop {
            match self.tick().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "worker tick failed");
                    sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Runs at most one job. Returns whether a job was found.
    async fn tick(&self) -> Result<bool, JobQueueError> {
        let job_types: Vec<&str> = self.handlers.keys().copied().collect();
        if job_types.is_empty() {
            return Ok(false);
        }

        let job = {
            let mut conn = match self.state.db() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(?err, "no database connection for the worker");
                    return Ok(false);
                }
            };
            match reserve_job(&mut conn, &job_types)? {
                Some(job) => job,
                None => return Ok(false),
            }
        };

        let Some(handler) = self.handlers.get(job.job_type.as_str()).cloned() else {
            error!(job_type = %job.job_type, "no handler registered for job type");
            if let Ok(mut conn) = self.state.db() {
                finish_job(&mut conn, &job, Outcome::Failed("no handler registered"))?;
            }
            return Ok(true);
        };

        let execution = handler.handle(self.state.clone(), job.clone()).await;
        let Ok(mut conn) = self.state.db() else {
            error!(job_id = %job.id, "could not record job outcome");
            return Ok(true);
        };

        let status = finish_job(&mut conn, &job, execution.outcome())?;
        drop(conn);
        match (&execution, status) {
            (_, JobStatus::Succeeded) => {
                info!(job_id = %job.id, job_type = %job.job_type, "job completed");
            }
            (JobExecution::Retry { error, .. }, JobStatus::Queued) => {
                warn!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, %error, "job will retry");
            }
            _ => {
                error!(job_id = %job.id, job_type = %job.job_type, attempts = job.attempts, ?execution, "job failed");
                if handler.recurring() {
                    self.seed_recurring()?;
                }
            }
        }

        Ok(true)
    }
}

pub fn default_handlers() -> Vec<Arc<dyn JobHandler>> {
    vec![Arc::new(reminders::DeadlineRemindersJob::new())]
}
