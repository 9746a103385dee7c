use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{ensure, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{NewTimeEntry, TimeEntry};
use crate::routes::briefs::load_visible_brief;
use crate::routes::tasks::load_task;
use crate::schema::time_entries;
use crate::state::AppState;
use crate::utils::json::non_empty;
use crate::utils::time::{elapsed_minutes, now, to_iso, to_iso_opt};

#[derive(Deserialize)]
pub struct StartTimerRequest {
    pub task_id: Option<Uuid>,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct ManualEntryRequest {
    pub task_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct ListEntriesQuery {
    pub user_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct TimeEntryResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_id: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub duration_minutes: Option<i32>,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct StartTimerResponse {
    pub entry: TimeEntryResponse,
    pub stopped: Option<TimeEntryResponse>,
}

impl From<TimeEntry> for TimeEntryResponse {
    fn from(entry: TimeEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            task_id: entry.task_id,
            brief_id: entry.brief_id,
            started_at: to_iso(entry.started_at),
            ended_at: to_iso_opt(entry.ended_at),
            duration_minutes: entry.duration_minutes,
            note: entry.note,
            created_at: to_iso(entry.created_at),
        }
    }
}

fn running_entry(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<TimeEntry>> {
    Ok(time_entries::table
        .filter(time_entries::user_id.eq(user_id))
        .filter(time_entries::ended_at.is_null())
        .for_update()
        .first(conn)
        .optional()?)
}

fn close_entry(conn: &mut PgConnection, entry: &TimeEntry, at: NaiveDateTime) -> AppResult<TimeEntry> {
    Ok(diesel::update(time_entries::table.find(entry.id))
        .set((
            time_entries::ended_at.eq(Some(at)),
            time_entries::duration_minutes.eq(Some(elapsed_minutes(entry.started_at, at))),
        ))
        .get_result(conn)?)
}

/// Resolves the brief of an optional task the caller may track time on.
fn resolve_task(
    conn: &mut PgConnection,
    caller: &Caller,
    task_id: Option<Uuid>,
) -> AppResult<Option<Uuid>> {
    let Some(task_id) = task_id else {
        return Ok(None);
    };
    let task = load_task(conn, task_id)?;
    if task.assignee_id != caller.id {
        load_visible_brief(conn, caller, task.brief_id)?;
    }
    Ok(Some(task.brief_id))
}

pub async fn start_timer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<StartTimerRequest>,
) -> AppResult<(StatusCode, Json<StartTimerResponse>)> {
    let mut conn = state.db()?;
    let (entry, stopped) = conn.transaction::<_, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief_id = resolve_task(conn, &caller, payload.task_id)?;
        let timestamp = now();

        let stopped = match running_entry(conn, caller.id)? {
            Some(running) => Some(close_entry(conn, &running, timestamp)?),
            None => None,
        };

        let entry: TimeEntry = diesel::insert_into(time_entries::table)
            .values(&NewTimeEntry {
                id: Uuid::new_v4(),
                user_id: caller.id,
                task_id: payload.task_id,
                brief_id,
                started_at: timestamp,
                ended_at: None,
                duration_minutes: None,
                note: non_empty(payload.note),
            })
            .get_result(conn)?;
        Ok((entry, stopped))
    })?;

    info!(
        entry_id = %entry.id,
        stopped = ?stopped.as_ref().map(|e| e.id),
        "timer started"
    );
    Ok((
        StatusCode::CREATED,
        Json(StartTimerResponse {
            entry: entry.into(),
            stopped: stopped.map(TimeEntryResponse::from),
        }),
    ))
}

pub async fn stop_timer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<TimeEntryResponse>> {
    let mut conn = state.db()?;
    let entry = conn.transaction::<TimeEntry, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let running = running_entry(conn, caller.id)?
            .ok_or_else(|| AppError::entity_not_found("running time entry"))?;
        close_entry(conn, &running, now())
    })?;

    info!(entry_id = %entry.id, minutes = ?entry.duration_minutes, "timer stopped");
    Ok(Json(entry.into()))
}

pub async fn active_timer(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Option<TimeEntryResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let entry: Option<TimeEntry> = time_entries::table
        .filter(time_entries::user_id.eq(caller.id))
        .filter(time_entries::ended_at.is_null())
        .first(&mut conn)
        .optional()?;
    Ok(Json(entry.map(TimeEntryResponse::from)))
}

pub async fn create_manual_entry(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ManualEntryRequest>,
) -> AppResult<(StatusCode, Json<TimeEntryResponse>)> {
    let started_at = payload.started_at.naive_utc();
    let ended_at = payload.ended_at.naive_utc();
    if ended_at <= started_at {
        return Err(AppError::bad_request("ended_at must be after started_at"));
    }

    let mut conn = state.db()?;
    let entry = conn.transaction::<TimeEntry, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief_id = resolve_task(conn, &caller, payload.task_id)?;

        Ok(diesel::insert_into(time_entries::table)
            .values(&NewTimeEntry {
                id: Uuid::new_v4(),
                user_id: caller.id,
                task_id: payload.task_id,
                brief_id,
                started_at,
                ended_at: Some(ended_at),
                duration_minutes: Some(elapsed_minutes(started_at, ended_at)),
                note: non_empty(payload.note),
            })
            .get_result(conn)?)
    })?;

    info!(entry_id = %entry.id, minutes = ?entry.duration_minutes, "manual time entry added");
    Ok((StatusCode::CREATED, Json(entry.into())))
}

pub async fn list_entries(
    State(state): State<AppState>,
    Query(query): Query<ListEntriesQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TimeEntryResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let target = query.user_id.unwrap_or(caller.id);
    if target != caller.id {
        ensure(caller.is_staff())?;
    }

    let rows: Vec<TimeEntry> = time_entries::table
        .filter(time_entries::user_id.eq(target))
        .order(time_entries::started_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(TimeEntryResponse::from).collect()))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let entry: TimeEntry = time_entries::table
            .find(entry_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("time entry"))?;
        ensure(caller.is_admin() || entry.user_id == caller.id)?;
        diesel::delete(time_entries::table.find(entry_id)).execute(conn)?;
        Ok(())
    })?;

    info!(entry_id = %entry_id, "time entry deleted");
    Ok(StatusCode::NO_CONTENT)
}
