//! Postgres-backed job queue. Rows are claimed with `FOR UPDATE SKIP LOCKED`
//! so any number of worker processes can poll the same table.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Job, NewJob};
use crate::schema::jobs;
use crate::utils::string_enum::string_enum;

string_enum! {
    pub enum JobStatus {
        Queued => "queued",
        Processing => "processing",
        Succeeded => "succeeded",
        Failed => "failed",
    }
}

pub const JOB_SEND_DEADLINE_REMINDERS: &str = "send-deadline-reminders";

/// A job that keeps asking for retries is failed on this attempt.
pub const MAX_ATTEMPTS: i32 = 5;

const FALLBACK_RETRY_DELAY: i64 = 30;

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

pub type JobQueueResult<T> = Result<T, JobQueueError>;

/// How a handler run ended, as recorded on the job row.
#[derive(Debug)]
pub enum Outcome<'a> {
    Succeeded,
    RetryAfter(Duration, &'a str),
    Failed(&'a str),
}

pub fn enqueue_job(
    conn: &mut PgConnection,
    job_type: &str,
    payload: Value,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Job> {
    Ok(diesel::insert_into(jobs::table)
        .values(&NewJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            status: JobStatus::Queued.as_str().to_string(),
            run_after: run_after.unwrap_or_else(|| Utc::now().naive_utc()),
        })
        .get_result(conn)?)
}

/// Enqueues `job_type` unless a queued or running instance already exists.
/// Returns the new job when one was created.
pub fn ensure_scheduled(
    conn: &mut PgConnection,
    job_type: &str,
    run_after: Option<NaiveDateTime>,
) -> JobQueueResult<Option<Job>> {
    conn.transaction(|conn| {
        let pending: bool = diesel::select(exists(
            jobs::table.filter(jobs::job_type.eq(job_type)).filter(
                jobs::status.eq_any(vec![JobStatus::Queued.as_str(), JobStatus::Processing.as_str()]),
            ),
        ))
        .get_result(conn)?;

        if pending {
            return Ok(None);
        }
        enqueue_job(conn, job_type, Value::Object(Default::default()), run_after).map(Some)
    })
}

/// Claims the oldest due job of one of `job_types` and bumps its attempt
/// counter.
pub fn reserve_job(conn: &mut PgConnection, job_types: &[&str]) -> JobQueueResult<Option<Job>> {
    let now = Utc::now().naive_utc();

    conn.transaction(|conn| {
        let Some(job) = jobs::table
            .filter(jobs::status.eq(JobStatus::Queued.as_str()))
            .filter(jobs::run_after.le(now))
            .filter(jobs::job_type.eq_any(job_types))
            .order(jobs::run_after.asc())
            .for_update()
            .skip_locked()
            .first::<Job>(conn)
            .optional()?
        else {
            return Ok(None);
        };

        let claimed = diesel::update(jobs::table.find(job.id))
            .set((
                jobs::status.eq(JobStatus::Processing.as_str()),
                jobs::attempts.eq(job.attempts + 1),
                jobs::updated_at.eq(now),
            ))
            .get_result(conn)?;
        Ok(Some(claimed))
    })
}

/// Records `outcome` for a reserved job and returns the status it landed in.
/// Retries past [`MAX_ATTEMPTS`] become failures.
pub fn finish_job(conn: &mut PgConnection, job: &Job, outcome: Outcome<'_>) -> JobQueueResult<JobStatus> {
    let now = Utc::now().naive_utc();
    let (status, run_after, error) = match outcome {
        Outcome::Succeeded => (JobStatus::Succeeded, job.run_after, None),
        Outcome::RetryAfter(delay, error) if job.attempts < MAX_ATTEMPTS => {
            (JobStatus::Queued, retry_at(now, delay), Some(error))
        }
        Outcome::RetryAfter(_, error) | Outcome::Failed(error) => {
            (JobStatus::Failed, job.run_after, Some(error))
        }
    };

    diesel::update(jobs::table.find(job.id))
        .set((
            jobs::status.eq(status.as_str()),
            jobs::run_after.eq(run_after),
            jobs::last_error.eq(error.map(str::to_string)),
            jobs::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(status)
}

fn retry_at(now: NaiveDateTime, delay: Duration) -> NaiveDateTime {
    now + ChronoDuration::from_std(delay)
        .unwrap_or_else(|_| ChronoDuration::seconds(FALLBACK_RETRY_DELAY))
}
