use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use tokio::task;
use tracing::{error, info, warn};

use crate::{
    jobs::{enqueue_job, JOB_SEND_DEADLINE_REMINDERS},
    models::Job,
    reminders::send_deadline_reminders,
    state::AppState,
};

use super::{JobExecution, JobHandler};

/// Sweeps upcoming and overdue deadlines, then schedules its next run.
pub struct DeadlineRemindersJob;

impl DeadlineRemindersJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DeadlineRemindersJob {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for DeadlineRemindersJob {
    fn job_type(&self) -> &'static str {
        JOB_SEND_DEADLINE_REMINDERS
    }

    fn recurring(&self) -> bool {
        true
    }

    async fn handle(&self, state: Arc<AppState>, job: Job) -> JobExecution {
        let state_clone = state.clone();
        match task::spawn_blocking(move || run_sweep(state_clone)).await {
            Ok(Ok(())) => JobExecution::Success,
            Ok(Err(err)) => {
                warn!(job_id = %job.id, error = %err, "reminder sweep will retry");
                JobExecution::Retry {
                    delay: Duration::from_secs(60),
                    error: err,
                }
            }
            Err(join_err) => {
                error!(job_id = %job.id, error = %join_err, "reminder sweep panicked");
                JobExecution::Retry {
                    delay: Duration::from_secs(120),
                    error: format!("worker panicked: {join_err}"),
                }
            }
        }
    }
}

fn run_sweep(state: Arc<AppState>) -> Result<(), String> {
    let mut conn = state.db().map_err(|err| err.to_string())?;
    let now = Utc::now().naive_utc();

    let report = send_deadline_reminders(&mut conn, now).map_err(|err| format!("{err:?}"))?;
    info!(
        sent = report.sent,
        suppressed = report.suppressed,
        "deadline reminder sweep finished"
    );

    let next_run = now + ChronoDuration::minutes(state.config.reminder_interval_minutes.max(1));
    enqueue_job(
        &mut conn,
        JOB_SEND_DEADLINE_REMINDERS,
        serde_json::Value::Object(Default::default()),
        Some(next_run),
    )
    .map_err(|err| err.to_string())?;

    Ok(())
}
