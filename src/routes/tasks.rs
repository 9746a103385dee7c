use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::{dsl::max, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::access::{can_manage_brief, can_update_task, ensure, Caller};
use crate::auth::AuthenticatedUser;
use crate::dependencies::{adjacency, validate_blockers};
use crate::error::{AppError, AppResult};
use crate::fanout::{
    log_activity, notify, notify_user, Notice, NotificationType, Recipients,
    ACTIVITY_DEPENDENCIES_CHANGED, ACTIVITY_TASKS_REORDERED, ACTIVITY_TASK_CREATED,
    ACTIVITY_TASK_DELETED, ACTIVITY_TASK_STATUS_CHANGED, ACTIVITY_TASK_UPDATED,
};
use crate::lifecycle::{
    assignee_transition_error, next_brief_status, prospective_statuses, BriefStatus, TaskStatus,
};
use crate::models::{Brief, NewTask, NewTaskDependency, Task};
use crate::routes::briefs::{brief_status, load_brief, load_visible_brief};
use crate::schema::{briefs, task_dependencies, tasks, users};
use crate::state::AppState;
use crate::utils::json::{double_option, non_empty};
use crate::utils::time::{now, to_iso, to_iso_opt};

pub const SORT_STEP: i32 = 1000;

#[derive(Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Uuid,
    pub duration_minutes: i32,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blocked_by: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub assignee_id: Option<Uuid>,
    pub duration_minutes: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = tasks)]
struct TaskChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    assignee_id: Option<Uuid>,
    assigned_by: Option<Uuid>,
    duration_minutes: Option<i32>,
    deadline: Option<Option<chrono::NaiveDateTime>>,
}

#[derive(Deserialize)]
pub struct UpdateTaskStatusRequest {
    pub status: TaskStatus,
}

#[derive(Deserialize)]
pub struct ReorderTasksRequest {
    pub task_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct SetDependenciesRequest {
    pub blocked_by: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Uuid,
    pub assigned_by: Uuid,
    pub status: String,
    pub sort_order: i32,
    pub duration_minutes: i32,
    pub deadline: Option<String>,
    pub completed_at: Option<String>,
    pub blocked_by: Vec<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct MyTaskResponse {
    #[serde(flatten)]
    pub task: TaskResponse,
    pub brief_title: String,
    pub brief_status: String,
}

#[derive(Serialize)]
pub struct TaskStatusResponse {
    pub task: TaskResponse,
    pub brief_status: String,
}

pub(crate) fn load_task(conn: &mut PgConnection, task_id: Uuid) -> AppResult<Task> {
    tasks::table
        .find(task_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("task"))
}

pub(crate) fn task_status(task: &Task) -> AppResult<TaskStatus> {
    TaskStatus::parse(&task.status)
        .ok_or_else(|| AppError::internal(format!("unknown task status '{}'", task.status)))
}

fn to_response(task: Task, blocked_by: Vec<Uuid>) -> TaskResponse {
    TaskResponse {
        id: task.id,
        brief_id: task.brief_id,
        title: task.title,
        description: task.description,
        assignee_id: task.assignee_id,
        assigned_by: task.assigned_by,
        status: task.status,
        sort_order: task.sort_order,
        duration_minutes: task.duration_minutes,
        deadline: to_iso_opt(task.deadline),
        completed_at: to_iso_opt(task.completed_at),
        blocked_by,
        created_at: to_iso(task.created_at),
        updated_at: to_iso(task.updated_at),
    }
}

pub(crate) fn task_responses(conn: &mut PgConnection, rows: Vec<Task>) -> AppResult<Vec<TaskResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|t| t.id).collect();
    let mut edges = if ids.is_empty() {
        HashMap::new()
    } else {
        adjacency(
            task_dependencies::table
                .filter(task_dependencies::task_id.eq_any(&ids))
                .select((task_dependencies::task_id, task_dependencies::blocked_by_id))
                .load::<(Uuid, Uuid)>(conn)?,
        )
    };

    Ok(rows
        .into_iter()
        .map(|task| {
            let blocked_by = edges.remove(&task.id).unwrap_or_default();
            to_response(task, blocked_by)
        })
        .collect())
}

fn task_response(conn: &mut PgConnection, task: Task) -> AppResult<TaskResponse> {
    task_responses(conn, vec![task])?
        .pop()
        .ok_or_else(|| AppError::entity_not_found("task"))
}

fn ensure_user_exists(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    users::table
        .find(user_id)
        .select(users::id)
        .first::<Uuid>(conn)
        .optional()?
        .map(|_| ())
        .ok_or_else(|| AppError::entity_not_found("assignee"))
}

fn ensure_open(brief: &Brief) -> AppResult<()> {
    if brief_status(brief)? == BriefStatus::Archived {
        return Err(AppError::bad_request("brief is archived"));
    }
    Ok(())
}

fn validate_duration(minutes: i32) -> AppResult<()> {
    if minutes < 0 {
        return Err(AppError::bad_request("duration_minutes must not be negative"));
    }
    Ok(())
}

pub(crate) fn next_sort_order(conn: &mut PgConnection, brief_id: Uuid) -> AppResult<i32> {
    let current: Option<i32> = tasks::table
        .filter(tasks::brief_id.eq(brief_id))
        .select(max(tasks::sort_order))
        .first(conn)?;
    Ok(current.unwrap_or(0) + SORT_STEP)
}

/// Replaces the blockers of `task_id` after validating them against the
/// brief's dependency graph.
fn replace_dependencies(
    conn: &mut PgConnection,
    brief_id: Uuid,
    task_id: Uuid,
    blocked_by: &[Uuid],
) -> AppResult<Vec<Uuid>> {
    let mut seen = HashSet::new();
    let blockers: Vec<Uuid> = blocked_by
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();

    let siblings: HashSet<Uuid> = tasks::table
        .filter(tasks::brief_id.eq(brief_id))
        .filter(tasks::id.ne(task_id))
        .select(tasks::id)
        .load::<Uuid>(conn)?
        .into_iter()
        .collect();
    let sibling_ids: Vec<Uuid> = siblings.iter().copied().collect();
    let mut edges = adjacency(
        task_dependencies::table
            .filter(task_dependencies::task_id.eq_any(&sibling_ids))
            .select((task_dependencies::task_id, task_dependencies::blocked_by_id))
            .load::<(Uuid, Uuid)>(conn)?,
    );
    edges.remove(&task_id);

    validate_blockers(task_id, &blockers, &siblings, &edges)
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    diesel::delete(task_dependencies::table.filter(task_dependencies::task_id.eq(task_id)))
        .execute(conn)?;
    if !blockers.is_empty() {
        let rows: Vec<NewTaskDependency> = blockers
            .iter()
            .map(|blocker| NewTaskDependency {
                task_id,
                blocked_by_id: *blocker,
            })
            .collect();
        diesel::insert_into(task_dependencies::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(blockers)
}

pub(crate) struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub assignee_id: Uuid,
    pub duration_minutes: i32,
    pub deadline: Option<DateTime<Utc>>,
    pub blocked_by: Vec<Uuid>,
}

/// Inserts a pending task at the end of the brief, notifies the assignee and
/// logs the creation. Shared with template instantiation.
pub(crate) fn insert_task(
    conn: &mut PgConnection,
    caller: &Caller,
    brief: &Brief,
    draft: TaskDraft,
) -> AppResult<Task> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    validate_duration(draft.duration_minutes)?;
    ensure_user_exists(conn, draft.assignee_id)?;

    let new_task = NewTask {
        id: Uuid::new_v4(),
        brief_id: brief.id,
        title,
        description: non_empty(draft.description),
        assignee_id: draft.assignee_id,
        assigned_by: caller.id,
        status: TaskStatus::Pending.as_str().to_string(),
        sort_order: next_sort_order(conn, brief.id)?,
        duration_minutes: draft.duration_minutes,
        deadline: draft.deadline.map(|d| d.naive_utc()),
    };
    let task: Task = diesel::insert_into(tasks::table)
        .values(&new_task)
        .get_result(conn)?;
    let blocked_by = replace_dependencies(conn, brief.id, task.id, &draft.blocked_by)?;

    log_activity(
        conn,
        brief.id,
        Some(caller.id),
        ACTIVITY_TASK_CREATED,
        json!({
            "task_id": task.id,
            "title": task.title,
            "assignee_id": task.assignee_id,
            "duration_minutes": task.duration_minutes,
            "blocked_by": blocked_by,
        }),
    )?;
    notify_user(
        conn,
        task.assignee_id,
        caller.id,
        &Notice::new(
            NotificationType::TaskAssigned,
            "New task assigned",
            format!("{} assigned you \"{}\" in \"{}\"", caller.name, task.title, brief.title),
        )
        .task(brief.id, task.id),
    )?;

    Ok(task)
}

/// Moves a task to `new_status` and applies the automatic brief transition.
/// Returns the updated task, the brief status afterwards and whether the
/// brief status changed. Activity logging is left to the caller.
pub(crate) fn apply_task_status(
    conn: &mut PgConnection,
    brief: &Brief,
    task: &Task,
    new_status: TaskStatus,
) -> AppResult<(Task, BriefStatus, bool)> {
    let timestamp = now();
    let completed_at = (new_status == TaskStatus::Done).then_some(timestamp);
    let updated: Task = diesel::update(tasks::table.find(task.id))
        .set((
            tasks::status.eq(new_status.as_str()),
            tasks::completed_at.eq(completed_at),
            tasks::updated_at.eq(timestamp),
        ))
        .get_result(conn)?;

    let siblings: Vec<Task> = tasks::table
        .filter(tasks::brief_id.eq(brief.id))
        .load(conn)?;
    let statuses = prospective_statuses(&siblings, task.id, new_status);
    let current = brief_status(brief)?;

    match next_brief_status(current, &statuses, new_status) {
        Some(next) => {
            diesel::update(briefs::table.find(brief.id))
                .set((
                    briefs::status.eq(next.as_str()),
                    briefs::updated_at.eq(timestamp),
                ))
                .execute(conn)?;
            info!(brief_id = %brief.id, from = %current, to = %next, "brief status advanced");
            Ok((updated, next, true))
        }
        None => Ok((updated, current, false)),
    }
}

pub async fn list_brief_tasks(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_visible_brief(&mut conn, &caller, brief_id)?;

    let rows: Vec<Task> = tasks::table
        .filter(tasks::brief_id.eq(brief_id))
        .order((tasks::sort_order.asc(), tasks::created_at.asc()))
        .load(&mut conn)?;
    Ok(Json(task_responses(&mut conn, rows)?))
}

pub async fn create_task(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTaskRequest>,
) -> AppResult<(StatusCode, Json<TaskResponse>)> {
    let mut conn = state.db()?;
    let response = conn.transaction::<TaskResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_brief(conn, brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;
        ensure_open(&brief)?;

        let task = insert_task(
            conn,
            &caller,
            &brief,
            TaskDraft {
                title: payload.title,
                description: payload.description,
                assignee_id: payload.assignee_id,
                duration_minutes: payload.duration_minutes,
                deadline: payload.deadline,
                blocked_by: payload.blocked_by,
            },
        )?;
        task_response(conn, task)
    })?;

    info!(task_id = %response.id, brief_id = %brief_id, sort_order = response.sort_order, "task created");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn my_tasks(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MyTaskResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let rows: Vec<(Task, String, String)> = tasks::table
        .inner_join(briefs::table)
        .filter(tasks::assignee_id.eq(caller.id))
        .filter(briefs::status.ne(BriefStatus::Archived.as_str()))
        .order((briefs::global_priority.asc(), tasks::sort_order.asc()))
        .select((tasks::all_columns, briefs::title, briefs::status))
        .load(&mut conn)?;

    let mut brief_info = Vec::with_capacity(rows.len());
    let mut task_rows = Vec::with_capacity(rows.len());
    for (task, title, status) in rows {
        brief_info.push((title, status));
        task_rows.push(task);
    }

    let responses = task_responses(&mut conn, task_rows)?;
    Ok(Json(
        responses
            .into_iter()
            .zip(brief_info)
            .map(|(task, (brief_title, brief_status))| MyTaskResponse {
                task,
                brief_title,
                brief_status,
            })
            .collect(),
    ))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let task = load_task(&mut conn, task_id)?;
    if task.assignee_id != caller.id {
        load_visible_brief(&mut conn, &caller, task.brief_id)?;
    }
    Ok(Json(task_response(&mut conn, task)?))
}

pub async fn update_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateTaskRequest>,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<TaskResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let task = load_task(conn, task_id)?;
        let brief = load_brief(conn, task.brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let mut changes = TaskChangeset::default();
        let mut changed = Map::new();

        if let Some(title) = payload.title {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            changed.insert("title".into(), json!(trimmed));
            changes.title = Some(trimmed.to_string());
        }
        if let Some(description) = payload.description {
            let description = non_empty(description);
            changed.insert("description".into(), json!(description));
            changes.description = Some(description);
        }
        if let Some(minutes) = payload.duration_minutes {
            validate_duration(minutes)?;
            changed.insert("duration_minutes".into(), json!(minutes));
            changes.duration_minutes = Some(minutes);
        }
        if let Some(deadline) = payload.deadline {
            let deadline = deadline.map(|d| d.naive_utc());
            changed.insert("deadline".into(), json!(to_iso_opt(deadline)));
            changes.deadline = Some(deadline);
        }

        let reassigned = payload
            .assignee_id
            .filter(|assignee| *assignee != task.assignee_id);
        if let Some(assignee) = reassigned {
            ensure_user_exists(conn, assignee)?;
            changed.insert(
                "assignee_id".into(),
                json!({ "from": task.assignee_id, "to": assignee }),
            );
            changes.assignee_id = Some(assignee);
            changes.assigned_by = Some(caller.id);
        }

        if changed.is_empty() {
            return task_response(conn, task);
        }

        let updated: Task = diesel::update(tasks::table.find(task_id))
            .set((&changes, tasks::updated_at.eq(now())))
            .get_result(conn)?;

        changed.insert("task_id".into(), json!(task_id));
        log_activity(
            conn,
            brief.id,
            Some(caller.id),
            ACTIVITY_TASK_UPDATED,
            Value::Object(changed),
        )?;

        if let Some(assignee) = reassigned {
            notify_user(
                conn,
                task.assignee_id,
                caller.id,
                &Notice::new(
                    NotificationType::TaskUnassigned,
                    "Task reassigned",
                    format!("\"{}\" was reassigned by {}", updated.title, caller.name),
                )
                .task(brief.id, task_id),
            )?;
            notify_user(
                conn,
                assignee,
                caller.id,
                &Notice::new(
                    NotificationType::TaskAssigned,
                    "New task assigned",
                    format!(
                        "{} assigned you \"{}\" in \"{}\"",
                        caller.name, updated.title, brief.title
                    ),
                )
                .task(brief.id, task_id),
            )?;
        }

        task_response(conn, updated)
    })?;

    info!(task_id = %task_id, "task updated");
    Ok(Json(response))
}

pub async fn update_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateTaskStatusRequest>,
) -> AppResult<Json<TaskStatusResponse>> {
    let new_status = payload.status;
    let mut conn = state.db()?;

    let response = conn.transaction::<TaskStatusResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let task = load_task(conn, task_id)?;
        let brief = load_brief(conn, task.brief_id)?;
        ensure(can_update_task(&caller, &brief, &task))?;
        ensure_open(&brief)?;

        let current = task_status(&task)?;
        if !can_manage_brief(&caller, &brief) {
            if let Some(reason) = assignee_transition_error(current, new_status) {
                return Err(AppError::forbidden_because(reason));
            }
        }

        if current == new_status {
            return Ok(TaskStatusResponse {
                brief_status: brief.status.clone(),
                task: task_response(conn, task)?,
            });
        }

        let (updated, brief_now, brief_changed) =
            apply_task_status(conn, &brief, &task, new_status)?;

        let mut details = json!({
            "task_id": task_id,
            "title": updated.title,
            "from": current,
            "to": new_status,
        });
        if brief_changed {
            details["brief_status"] = json!(brief_now);
        }
        log_activity(
            conn,
            brief.id,
            Some(caller.id),
            ACTIVITY_TASK_STATUS_CHANGED,
            details,
        )?;

        let mut recipients = Recipients::excluding(Some(caller.id));
        recipients.add(updated.assignee_id).add(updated.assigned_by);
        notify(
            conn,
            &recipients,
            Some(caller.id),
            &Notice::new(
                NotificationType::TaskStatusChanged,
                "Task status changed",
                format!(
                    "{} moved \"{}\" from {} to {}",
                    caller.name, updated.title, current, new_status
                ),
            )
            .task(brief.id, task_id),
        )?;

        Ok(TaskStatusResponse {
            brief_status: brief_now.as_str().to_string(),
            task: task_response(conn, updated)?,
        })
    })?;

    info!(
        task_id = %task_id,
        status = %new_status,
        brief_status = %response.brief_status,
        "task status updated"
    );
    Ok(Json(response))
}

pub async fn reorder_tasks(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<ReorderTasksRequest>,
) -> AppResult<Json<Vec<TaskResponse>>> {
    let unique: HashSet<Uuid> = payload.task_ids.iter().copied().collect();
    if unique.len() != payload.task_ids.len() {
        return Err(AppError::bad_request("task_ids must not contain duplicates"));
    }

    let mut conn = state.db()?;
    let response = conn.transaction::<Vec<TaskResponse>, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_brief(conn, brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let owned: HashSet<Uuid> = tasks::table
            .filter(tasks::brief_id.eq(brief_id))
            .select(tasks::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();
        if let Some(stranger) = payload.task_ids.iter().find(|id| !owned.contains(id)) {
            return Err(AppError::bad_request(format!(
                "task {stranger} does not belong to this brief"
            )));
        }

        let timestamp = now();
        for (position, task_id) in payload.task_ids.iter().enumerate() {
            diesel::update(tasks::table.find(*task_id))
                .set((
                    tasks::sort_order.eq((position as i32 + 1) * SORT_STEP),
                    tasks::updated_at.eq(timestamp),
                ))
                .execute(conn)?;
        }
        log_activity(
            conn,
            brief_id,
            Some(caller.id),
            ACTIVITY_TASKS_REORDERED,
            json!({ "task_ids": payload.task_ids }),
        )?;

        let rows: Vec<Task> = tasks::table
            .filter(tasks::brief_id.eq(brief_id))
            .order((tasks::sort_order.asc(), tasks::created_at.asc()))
            .load(conn)?;
        task_responses(conn, rows)
    })?;

    info!(brief_id = %brief_id, count = payload.task_ids.len(), "tasks reordered");
    Ok(Json(response))
}

pub async fn set_dependencies(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SetDependenciesRequest>,
) -> AppResult<Json<TaskResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<TaskResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let task = load_task(conn, task_id)?;
        let brief = load_brief(conn, task.brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let blockers = replace_dependencies(conn, brief.id, task_id, &payload.blocked_by)?;
        log_activity(
            conn,
            brief.id,
            Some(caller.id),
            ACTIVITY_DEPENDENCIES_CHANGED,
            json!({ "task_id": task_id, "blocked_by": blockers }),
        )?;
        task_response(conn, task)
    })?;

    info!(task_id = %task_id, blockers = response.blocked_by.len(), "task dependencies replaced");
    Ok(Json(response))
}

pub async fn delete_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let task = load_task(conn, task_id)?;
        let brief = load_brief(conn, task.brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        diesel::delete(tasks::table.find(task_id)).execute(conn)?;
        log_activity(
            conn,
            brief.id,
            Some(caller.id),
            ACTIVITY_TASK_DELETED,
            json!({ "task_id": task_id, "title": task.title }),
        )?;
        Ok(())
    })?;

    info!(task_id = %task_id, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}
