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

use crate::access::{
    brief_scope, can_manage_brief, ensure, ensure_brief_visible, require_admin, require_staff,
    BriefScope, Caller, Role,
};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::fanout::{
    log_activity, notify_user, Notice, NotificationType, ACTIVITY_BRIEF_ARCHIVED,
    ACTIVITY_BRIEF_CREATED, ACTIVITY_BRIEF_RESTORED, ACTIVITY_BRIEF_STATUS_CHANGED,
    ACTIVITY_BRIEF_TEAMS_CHANGED, ACTIVITY_BRIEF_UPDATED,
};
use crate::jsr::StatusSummary;
use crate::lifecycle::{check_manual_brief_transition, BriefStatus, TaskStatus};
use crate::models::{ActivityLog, Brief, NewBrief, NewBriefTeam, Task};
use crate::routes::brands::load_brand;
use crate::routes::tasks::{task_responses, TaskResponse};
use crate::schema::{activity_logs, brief_teams, briefs, tasks, teams, users};
use crate::state::AppState;
use crate::utils::json::{double_option, non_empty};
use crate::utils::time::{now, to_iso, to_iso_opt};

#[derive(Deserialize)]
pub struct CreateBriefRequest {
    pub title: String,
    pub description: Option<String>,
    pub brand_id: Option<Uuid>,
    pub assigned_manager_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub team_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateBriefRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub brand_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "double_option")]
    pub deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assigned_manager_id: Option<Option<Uuid>>,
    pub status: Option<BriefStatus>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = briefs)]
struct BriefChangeset {
    title: Option<String>,
    description: Option<Option<String>>,
    brand_id: Option<Option<Uuid>>,
    deadline: Option<Option<chrono::NaiveDateTime>>,
    assigned_manager_id: Option<Option<Uuid>>,
    status: Option<String>,
}

#[derive(Deserialize)]
pub struct ReorderBriefsRequest {
    pub brief_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct SetBriefTeamsRequest {
    pub team_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct BriefResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub assigned_manager_id: Option<Uuid>,
    pub global_priority: i32,
    pub deadline: Option<String>,
    pub brand_id: Option<Uuid>,
    pub created_by: Uuid,
    pub archived_at: Option<String>,
    pub archived_by: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
    pub tasks_summary: StatusSummary,
}

#[derive(Serialize)]
pub struct BriefDetailResponse {
    #[serde(flatten)]
    pub brief: BriefResponse,
    pub team_ids: Vec<Uuid>,
    pub tasks: Vec<TaskResponse>,
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub actor_name: Option<String>,
    pub action: String,
    pub details: Value,
    pub created_at: String,
}

pub(crate) fn load_brief(conn: &mut PgConnection, brief_id: Uuid) -> AppResult<Brief> {
    briefs::table
        .find(brief_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("brief"))
}

pub(crate) fn brief_status(brief: &Brief) -> AppResult<BriefStatus> {
    BriefStatus::parse(&brief.status)
        .ok_or_else(|| AppError::internal(format!("unknown brief status '{}'", brief.status)))
}

fn to_response(brief: Brief, summary: StatusSummary) -> BriefResponse {
    BriefResponse {
        id: brief.id,
        title: brief.title,
        description: brief.description,
        status: brief.status,
        assigned_manager_id: brief.assigned_manager_id,
        global_priority: brief.global_priority,
        deadline: to_iso_opt(brief.deadline),
        brand_id: brief.brand_id,
        created_by: brief.created_by,
        archived_at: to_iso_opt(brief.archived_at),
        archived_by: brief.archived_by,
        created_at: to_iso(brief.created_at),
        updated_at: to_iso(brief.updated_at),
        tasks_summary: summary,
    }
}

fn with_summaries(conn: &mut PgConnection, rows: Vec<Brief>) -> AppResult<Vec<BriefResponse>> {
    let ids: Vec<Uuid> = rows.iter().map(|b| b.id).collect();
    let mut statuses: HashMap<Uuid, Vec<TaskStatus>> = HashMap::new();
    if !ids.is_empty() {
        let task_rows: Vec<(Uuid, String)> = tasks::table
            .filter(tasks::brief_id.eq_any(&ids))
            .select((tasks::brief_id, tasks::status))
            .load(conn)?;
        for (brief_id, status) in task_rows {
            if let Some(status) = TaskStatus::parse(&status) {
                statuses.entry(brief_id).or_default().push(status);
            }
        }
    }

    Ok(rows
        .into_iter()
        .map(|brief| {
            let summary = StatusSummary::of_tasks(statuses.remove(&brief.id).unwrap_or_default());
            to_response(brief, summary)
        })
        .collect())
}

pub(crate) fn detail(conn: &mut PgConnection, brief: Brief) -> AppResult<BriefDetailResponse> {
    let task_rows: Vec<Task> = tasks::table
        .filter(tasks::brief_id.eq(brief.id))
        .order((tasks::sort_order.asc(), tasks::created_at.asc()))
        .load(conn)?;
    let team_ids: Vec<Uuid> = brief_teams::table
        .filter(brief_teams::brief_id.eq(brief.id))
        .select(brief_teams::team_id)
        .load(conn)?;

    let summary = StatusSummary::of_tasks(
        task_rows
            .iter()
            .filter_map(|task| TaskStatus::parse(&task.status)),
    );
    let tasks = task_responses(conn, task_rows)?;

    Ok(BriefDetailResponse {
        brief: to_response(brief, summary),
        team_ids,
        tasks,
    })
}

/// Resolves a brief the caller is allowed to read.
pub(crate) fn load_visible_brief(
    conn: &mut PgConnection,
    caller: &Caller,
    brief_id: Uuid,
) -> AppResult<Brief> {
    let brief = load_brief(conn, brief_id)?;
    ensure_brief_visible(conn, caller, &brief)?;
    Ok(brief)
}

fn validate_manager(conn: &mut PgConnection, user_id: Uuid) -> AppResult<()> {
    let role: Option<String> = users::table
        .find(user_id)
        .select(users::role)
        .first(conn)
        .optional()?;
    match role.as_deref().and_then(Role::parse) {
        Some(Role::Admin | Role::Manager) => Ok(()),
        Some(Role::Employee) => Err(AppError::bad_request(
            "assigned manager must be a manager or admin",
        )),
        None => Err(AppError::entity_not_found("user")),
    }
}

fn replace_teams(conn: &mut PgConnection, brief_id: Uuid, team_ids: &[Uuid]) -> AppResult<Vec<Uuid>> {
    let unique: Vec<Uuid> = team_ids
        .iter()
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if !unique.is_empty() {
        let known: HashSet<Uuid> = teams::table
            .filter(teams::id.eq_any(&unique))
            .select(teams::id)
            .load::<Uuid>(conn)?
            .into_iter()
            .collect();
        if unique.iter().any(|id| !known.contains(id)) {
            return Err(AppError::entity_not_found("team"));
        }
    }

    diesel::delete(brief_teams::table.filter(brief_teams::brief_id.eq(brief_id))).execute(conn)?;
    if !unique.is_empty() {
        let rows: Vec<NewBriefTeam> = unique
            .iter()
            .map(|team_id| NewBriefTeam {
                brief_id,
                team_id: *team_id,
            })
            .collect();
        diesel::insert_into(brief_teams::table)
            .values(&rows)
            .execute(conn)?;
    }
    Ok(unique)
}

pub(crate) fn next_global_priority(conn: &mut PgConnection) -> AppResult<i32> {
    let current: Option<i32> = briefs::table
        .select(max(briefs::global_priority))
        .first(conn)?;
    Ok(current.unwrap_or(0) + 1)
}

pub(crate) struct BriefDraft {
    pub title: String,
    pub description: Option<String>,
    pub brand_id: Option<Uuid>,
    pub assigned_manager_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub team_ids: Vec<Uuid>,
}

/// Inserts a draft brief with its team links, activity row and manager
/// notification. Shared with template instantiation.
pub(crate) fn insert_brief(
    conn: &mut PgConnection,
    caller: &Caller,
    draft: BriefDraft,
) -> AppResult<Brief> {
    let title = draft.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    if let Some(brand_id) = draft.brand_id {
        load_brand(conn, brand_id)?;
    }
    let assigned_manager_id = match draft.assigned_manager_id {
        Some(id) => {
            validate_manager(conn, id)?;
            Some(id)
        }
        None if caller.is_manager() => Some(caller.id),
        None => None,
    };

    let new_brief = NewBrief {
        id: Uuid::new_v4(),
        title,
        description: non_empty(draft.description),
        status: BriefStatus::Draft.as_str().to_string(),
        assigned_manager_id,
        global_priority: next_global_priority(conn)?,
        deadline: draft.deadline.map(|d| d.naive_utc()),
        brand_id: draft.brand_id,
        created_by: caller.id,
    };
    let brief: Brief = diesel::insert_into(briefs::table)
        .values(&new_brief)
        .get_result(conn)?;
    let team_ids = replace_teams(conn, brief.id, &draft.team_ids)?;

    log_activity(
        conn,
        brief.id,
        Some(caller.id),
        ACTIVITY_BRIEF_CREATED,
        json!({
            "title": brief.title,
            "assigned_manager_id": brief.assigned_manager_id,
            "brand_id": brief.brand_id,
            "team_ids": team_ids,
        }),
    )?;

    if let Some(manager) = brief.assigned_manager_id {
        notify_user(
            conn,
            manager,
            caller.id,
            &Notice::new(
                NotificationType::BriefAssigned,
                "Brief assigned",
                format!("{} assigned you the brief \"{}\"", caller.name, brief.title),
            )
            .brief(brief.id),
        )?;
    }

    Ok(brief)
}

fn load_scoped(
    conn: &mut PgConnection,
    caller: &Caller,
    archived: bool,
) -> AppResult<Vec<Brief>> {
    let mut query = briefs::table.into_boxed();
    query = if archived {
        query.filter(briefs::status.eq(BriefStatus::Archived.as_str()))
    } else {
        query.filter(briefs::status.ne(BriefStatus::Archived.as_str()))
    };

    match brief_scope(conn, caller)? {
        BriefScope::All => {}
        BriefScope::Only(ids) if ids.is_empty() => return Ok(Vec::new()),
        BriefScope::Only(ids) => {
            let ids: Vec<Uuid> = ids.into_iter().collect();
            query = query.filter(briefs::id.eq_any(ids));
        }
    }

    let ordered = if archived {
        query.order(briefs::archived_at.desc())
    } else {
        query.order((briefs::global_priority.asc(), briefs::created_at.asc()))
    };
    Ok(ordered.load(conn)?)
}

pub async fn list_briefs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<BriefResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let rows = load_scoped(&mut conn, &caller, false)?;
    Ok(Json(with_summaries(&mut conn, rows)?))
}

pub async fn list_archived_briefs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<BriefResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let rows = load_scoped(&mut conn, &caller, true)?;
    Ok(Json(with_summaries(&mut conn, rows)?))
}

pub async fn create_brief(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateBriefRequest>,
) -> AppResult<(StatusCode, Json<BriefDetailResponse>)> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;

        let brief = insert_brief(
            conn,
            &caller,
            BriefDraft {
                title: payload.title,
                description: payload.description,
                brand_id: payload.brand_id,
                assigned_manager_id: payload.assigned_manager_id,
                deadline: payload.deadline,
                team_ids: payload.team_ids,
            },
        )?;
        detail(conn, brief)
    })?;

    info!(brief_id = %response.brief.id, priority = response.brief.global_priority, "brief created");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<BriefDetailResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let brief = load_visible_brief(&mut conn, &caller, brief_id)?;
    Ok(Json(detail(&mut conn, brief)?))
}

pub async fn update_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateBriefRequest>,
) -> AppResult<Json<BriefDetailResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_brief(conn, brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let mut changes = BriefChangeset::default();
        let mut changed = Map::new();

        if let Some(title) = payload.title {
            let trimmed = title.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            if trimmed != brief.title {
                changed.insert("title".into(), json!(trimmed));
                changes.title = Some(trimmed.to_string());
            }
        }
        if let Some(description) = payload.description {
            let description = non_empty(description);
            changed.insert("description".into(), json!(description));
            changes.description = Some(description);
        }
        if let Some(brand_id) = payload.brand_id {
            if let Some(id) = brand_id {
                load_brand(conn, id)?;
            }
            changed.insert("brand_id".into(), json!(brand_id));
            changes.brand_id = Some(brand_id);
        }
        if let Some(deadline) = payload.deadline {
            let deadline = deadline.map(|d| d.naive_utc());
            changed.insert("deadline".into(), json!(to_iso_opt(deadline)));
            changes.deadline = Some(deadline);
        }

        let mut new_manager = None;
        if let Some(manager) = payload.assigned_manager_id {
            if let Some(id) = manager {
                validate_manager(conn, id)?;
                if brief.assigned_manager_id != Some(id) {
                    new_manager = Some(id);
                }
            }
            changed.insert("assigned_manager_id".into(), json!(manager));
            changes.assigned_manager_id = Some(manager);
        }

        let mut status_only = false;
        if let Some(status) = payload.status {
            let current = brief_status(&brief)?;
            if status != current {
                check_manual_brief_transition(current, status).map_err(AppError::bad_request)?;
                status_only = changed.is_empty();
                changed.insert("status".into(), json!({ "from": current, "to": status }));
                changes.status = Some(status.as_str().to_string());
            }
        }

        if changed.is_empty() {
            return detail(conn, brief);
        }

        let updated: Brief = diesel::update(briefs::table.find(brief_id))
            .set((&changes, briefs::updated_at.eq(now())))
            .get_result(conn)?;

        let action = if status_only {
            ACTIVITY_BRIEF_STATUS_CHANGED
        } else {
            ACTIVITY_BRIEF_UPDATED
        };
        log_activity(conn, brief_id, Some(caller.id), action, Value::Object(changed))?;

        if let Some(manager) = new_manager {
            notify_user(
                conn,
                manager,
                caller.id,
                &Notice::new(
                    NotificationType::BriefAssigned,
                    "Brief assigned",
                    format!("{} assigned you the brief \"{}\"", caller.name, updated.title),
                )
                .brief(brief_id),
            )?;
        }

        detail(conn, updated)
    })?;

    info!(brief_id = %brief_id, status = %response.brief.status, "brief updated");
    Ok(Json(response))
}

pub async fn reorder_briefs(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ReorderBriefsRequest>,
) -> AppResult<StatusCode> {
    let unique: HashSet<Uuid> = payload.brief_ids.iter().copied().collect();
    if unique.len() != payload.brief_ids.len() {
        return Err(AppError::bad_request("brief_ids must not contain duplicates"));
    }

    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;

        let ids: Vec<Uuid> = unique.iter().copied().collect();
        let found: i64 = briefs::table
            .filter(briefs::id.eq_any(&ids))
            .count()
            .get_result(conn)?;
        if found != ids.len() as i64 {
            return Err(AppError::entity_not_found("brief"));
        }
        if !caller.is_admin() {
            let scope = brief_scope(conn, &caller)?;
            ensure(ids.iter().all(|id| scope.contains(*id)))?;
        }

        for (position, brief_id) in payload.brief_ids.iter().enumerate() {
            diesel::update(briefs::table.find(*brief_id))
                .set(briefs::global_priority.eq(position as i32 + 1))
                .execute(conn)?;
        }
        Ok(())
    })?;

    info!(count = payload.brief_ids.len(), "briefs reordered");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn archive_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<BriefDetailResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_brief(conn, brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let previous = brief_status(&brief)?;
        if previous == BriefStatus::Archived {
            return Err(AppError::bad_request("brief is already archived"));
        }

        let timestamp = now();
        let updated: Brief = diesel::update(briefs::table.find(brief_id))
            .set((
                briefs::status.eq(BriefStatus::Archived.as_str()),
                briefs::archived_at.eq(Some(timestamp)),
                briefs::archived_by.eq(Some(caller.id)),
                briefs::updated_at.eq(timestamp),
            ))
            .get_result(conn)?;

        log_activity(
            conn,
            brief_id,
            Some(caller.id),
            ACTIVITY_BRIEF_ARCHIVED,
            json!({ "previous_status": previous }),
        )?;
        detail(conn, updated)
    })?;

    info!(brief_id = %brief_id, "brief archived");
    Ok(Json(response))
}

pub async fn restore_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<BriefDetailResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;
        let brief = load_brief(conn, brief_id)?;
        if brief_status(&brief)? != BriefStatus::Archived {
            return Err(AppError::bad_request("only archived briefs can be restored"));
        }

        let updated: Brief = diesel::update(briefs::table.find(brief_id))
            .set((
                briefs::status.eq(BriefStatus::Draft.as_str()),
                briefs::archived_at.eq(None::<chrono::NaiveDateTime>),
                briefs::archived_by.eq(None::<Uuid>),
                briefs::updated_at.eq(now()),
            ))
            .get_result(conn)?;

        log_activity(conn, brief_id, Some(caller.id), ACTIVITY_BRIEF_RESTORED, json!({}))?;
        detail(conn, updated)
    })?;

    info!(brief_id = %brief_id, "brief restored");
    Ok(Json(response))
}

pub async fn delete_brief(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;
        load_brief(conn, brief_id)?;

        // Tasks, deliverables, dependencies, comments, activity, team links
        // and notifications go with the brief through ON DELETE CASCADE.
        diesel::delete(briefs::table.find(brief_id)).execute(conn)?;
        Ok(())
    })?;

    info!(brief_id = %brief_id, "brief deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_brief_teams(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<SetBriefTeamsRequest>,
) -> AppResult<Json<BriefDetailResponse>> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_brief(conn, brief_id)?;
        ensure(can_manage_brief(&caller, &brief))?;

        let team_ids = replace_teams(conn, brief_id, &payload.team_ids)?;
        log_activity(
            conn,
            brief_id,
            Some(caller.id),
            ACTIVITY_BRIEF_TEAMS_CHANGED,
            json!({ "team_ids": team_ids }),
        )?;
        detail(conn, brief)
    })?;

    info!(brief_id = %brief_id, teams = response.team_ids.len(), "brief teams replaced");
    Ok(Json(response))
}

pub async fn brief_activity(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ActivityResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_visible_brief(&mut conn, &caller, brief_id)?;

    let rows: Vec<(ActivityLog, Option<String>)> = activity_logs::table
        .left_join(users::table.on(activity_logs::actor_id.eq(users::id.nullable())))
        .filter(activity_logs::brief_id.eq(brief_id))
        .order(activity_logs::created_at.desc())
        .select((activity_logs::all_columns, users::name.nullable()))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(entry, actor_name)| ActivityResponse {
                id: entry.id,
                brief_id: entry.brief_id,
                actor_id: entry.actor_id,
                actor_name,
                action: entry.action,
                details: entry.details,
                created_at: to_iso(entry.created_at),
            })
            .collect(),
    ))
}
