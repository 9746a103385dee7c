//! Share-link management for staff plus the two unauthenticated endpoints
//! external clients reach with a link token.

use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{can_manage_brand, ensure, Caller, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::fanout::{notify, Notice, NotificationType, Recipients};
use crate::jsr::{
    generate_token, is_well_formed_token, overall_deadline, summarize, ClientTaskStatus,
    StatusSummary,
};
use crate::lifecycle::{BriefStatus, TaskStatus};
use crate::models::{Brand, Brief, JsrClientTask, JsrLink, NewJsrClientTask, NewJsrLink, Task};
use crate::routes::brands::load_brand;
use crate::routes::briefs::load_brief;
use crate::schema::{brand_managers, briefs, jsr_client_tasks, jsr_links, tasks, users};
use crate::state::AppState;
use crate::utils::json::{double_option, non_empty};
use crate::utils::time::{now, to_iso, to_iso_opt};

#[derive(Serialize)]
pub struct JsrLinkResponse {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub token: String,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: String,
    pub deactivated_at: Option<String>,
}

impl From<JsrLink> for JsrLinkResponse {
    fn from(link: JsrLink) -> Self {
        Self {
            id: link.id,
            brand_id: link.brand_id,
            token: link.token,
            is_active: link.is_active,
            created_by: link.created_by,
            created_at: to_iso(link.created_at),
            deactivated_at: to_iso_opt(link.deactivated_at),
        }
    }
}

#[derive(Serialize)]
pub struct ClientTaskResponse {
    pub id: Uuid,
    pub brand_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub requested_deadline: Option<String>,
    pub final_deadline: Option<String>,
    pub status: String,
    pub brief_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<JsrClientTask> for ClientTaskResponse {
    fn from(task: JsrClientTask) -> Self {
        Self {
            id: task.id,
            brand_id: task.brand_id,
            title: task.title,
            description: task.description,
            client_name: task.client_name,
            requested_deadline: to_iso_opt(task.requested_deadline),
            final_deadline: to_iso_opt(task.final_deadline),
            status: task.status,
            brief_id: task.brief_id,
            created_at: to_iso(task.created_at),
            updated_at: to_iso(task.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct PublicBrand {
    pub id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub description: Option<String>,
}

/// Task as shown to clients: no assignee or assigner identity.
#[derive(Serialize)]
pub struct PublicTask {
    pub id: Uuid,
    pub title: String,
    pub status: String,
    pub deadline: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Serialize)]
pub struct PublicBrief {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub deadline: Option<String>,
    pub tasks: Vec<PublicTask>,
}

#[derive(Serialize)]
pub struct JsrViewResponse {
    pub brand: PublicBrand,
    pub briefs: Vec<PublicBrief>,
    pub client_tasks: Vec<ClientTaskResponse>,
    pub summary: StatusSummary,
    pub overall_deadline: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitClientTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub client_name: Option<String>,
    pub requested_deadline: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
pub struct UpdateClientTaskRequest {
    pub status: Option<ClientTaskStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub final_deadline: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub brief_id: Option<Option<Uuid>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = jsr_client_tasks)]
struct ClientTaskChangeset {
    status: Option<String>,
    final_deadline: Option<Option<chrono::NaiveDateTime>>,
    brief_id: Option<Option<Uuid>>,
}

fn active_link(conn: &mut PgConnection, brand_id: Uuid) -> AppResult<Option<JsrLink>> {
    Ok(jsr_links::table
        .filter(jsr_links::brand_id.eq(brand_id))
        .filter(jsr_links::is_active.eq(true))
        .first(conn)
        .optional()?)
}

/// Active link for a public token. Malformed tokens never reach the database.
fn link_by_token(conn: &mut PgConnection, token: &str) -> AppResult<Option<JsrLink>> {
    if !is_well_formed_token(token) {
        return Ok(None);
    }
    Ok(jsr_links::table
        .filter(jsr_links::token.eq(token))
        .filter(jsr_links::is_active.eq(true))
        .first(conn)
        .optional()?)
}

fn ensure_brand_manager(conn: &mut PgConnection, caller: &Caller, brand_id: Uuid) -> AppResult<()> {
    ensure(can_manage_brand(conn, caller, brand_id)?)
}

pub async fn generate_jsr_link(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<JsrLinkResponse>> {
    let mut conn = state.db()?;
    let (link, created) = conn.transaction::<_, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        load_brand(conn, brand_id)?;
        ensure_brand_manager(conn, &caller, brand_id)?;

        if let Some(existing) = active_link(conn, brand_id)? {
            return Ok((existing, false));
        }
        let link: JsrLink = diesel::insert_into(jsr_links::table)
            .values(&NewJsrLink {
                id: Uuid::new_v4(),
                brand_id,
                token: generate_token(),
                is_active: true,
                created_by: caller.id,
            })
            .get_result(conn)?;
        Ok((link, true))
    })?;

    if created {
        info!(brand_id = %brand_id, link_id = %link.id, "share link generated");
    }
    Ok(Json(link.into()))
}

pub async fn get_jsr_link(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Option<JsrLinkResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_brand(&mut conn, brand_id)?;
    ensure_brand_manager(&mut conn, &caller, brand_id)?;
    Ok(Json(active_link(&mut conn, brand_id)?.map(JsrLinkResponse::from)))
}

pub async fn deactivate_jsr_link(
    State(state): State<AppState>,
    Path(link_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<JsrLinkResponse>> {
    let mut conn = state.db()?;
    let link = conn.transaction::<JsrLink, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let link: JsrLink = jsr_links::table
            .find(link_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("share link"))?;
        ensure_brand_manager(conn, &caller, link.brand_id)?;
        if !link.is_active {
            return Ok(link);
        }
        Ok(diesel::update(jsr_links::table.find(link_id))
            .set((
                jsr_links::is_active.eq(false),
                jsr_links::deactivated_at.eq(Some(now())),
            ))
            .get_result(conn)?)
    })?;

    info!(link_id = %link_id, brand_id = %link.brand_id, "share link deactivated");
    Ok(Json(link.into()))
}

fn public_view(conn: &mut PgConnection, brand: Brand) -> AppResult<JsrViewResponse> {
    let brief_rows: Vec<Brief> = briefs::table
        .filter(briefs::brand_id.eq(brand.id))
        .filter(briefs::status.ne_all(vec![
            BriefStatus::Archived.as_str(),
            BriefStatus::Draft.as_str(),
        ]))
        .order((briefs::global_priority.asc(), briefs::created_at.asc()))
        .load(conn)?;
    let brief_ids: Vec<Uuid> = brief_rows.iter().map(|b| b.id).collect();

    let task_rows: Vec<Task> = if brief_ids.is_empty() {
        Vec::new()
    } else {
        tasks::table
            .filter(tasks::brief_id.eq_any(&brief_ids))
            .order((tasks::sort_order.asc(), tasks::created_at.asc()))
            .load(conn)?
    };
    let client_rows: Vec<JsrClientTask> = jsr_client_tasks::table
        .filter(jsr_client_tasks::brand_id.eq(brand.id))
        .order(jsr_client_tasks::created_at.asc())
        .load(conn)?;

    let summary = summarize(
        task_rows.iter().filter_map(|t| TaskStatus::parse(&t.status)),
        client_rows
            .iter()
            .filter_map(|c| ClientTaskStatus::parse(&c.status)),
    );
    let deadline = overall_deadline(
        task_rows.iter().map(|t| t.deadline),
        client_rows.iter().map(|c| c.final_deadline),
    );

    let mut grouped: HashMap<Uuid, Vec<PublicTask>> = HashMap::new();
    for task in task_rows {
        grouped.entry(task.brief_id).or_default().push(PublicTask {
            id: task.id,
            title: task.title,
            status: task.status,
            deadline: to_iso_opt(task.deadline),
            completed_at: to_iso_opt(task.completed_at),
        });
    }

    Ok(JsrViewResponse {
        brand: PublicBrand {
            id: brand.id,
            name: brand.name,
            color: brand.color,
            description: brand.description,
        },
        briefs: brief_rows
            .into_iter()
            .map(|brief| PublicBrief {
                tasks: grouped.remove(&brief.id).unwrap_or_default(),
                id: brief.id,
                title: brief.title,
                description: brief.description,
                status: brief.status,
                deadline: to_iso_opt(brief.deadline),
            })
            .collect(),
        client_tasks: client_rows.into_iter().map(ClientTaskResponse::from).collect(),
        summary,
        overall_deadline: to_iso_opt(deadline),
    })
}

/// Unauthenticated. Answers `null` for unknown or deactivated tokens.
pub async fn get_jsr_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<Option<JsrViewResponse>>> {
    let mut conn = state.db()?;
    let view = conn.transaction::<Option<JsrViewResponse>, AppError, _>(|conn| {
        let Some(link) = link_by_token(conn, &token)? else {
            return Ok(None);
        };
        let brand = load_brand(conn, link.brand_id)?;
        public_view(conn, brand).map(Some)
    })?;
    Ok(Json(view))
}

/// Unauthenticated. Appends a client request and alerts every admin and
/// every manager of the brand once.
pub async fn submit_client_task(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<SubmitClientTaskRequest>,
) -> AppResult<(StatusCode, Json<ClientTaskResponse>)> {
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let mut conn = state.db()?;
    let task = conn.transaction::<JsrClientTask, AppError, _>(|conn| {
        let link = link_by_token(conn, &token)?
            .ok_or_else(|| AppError::entity_not_found("share link"))?;
        let brand = load_brand(conn, link.brand_id)?;

        let task: JsrClientTask = diesel::insert_into(jsr_client_tasks::table)
            .values(&NewJsrClientTask {
                id: Uuid::new_v4(),
                jsr_link_id: link.id,
                brand_id: brand.id,
                title,
                description: non_empty(payload.description),
                client_name: non_empty(payload.client_name),
                requested_deadline: payload.requested_deadline.map(|d| d.naive_utc()),
                status: ClientTaskStatus::PendingReview.as_str().to_string(),
            })
            .get_result(conn)?;

        let admins: Vec<Uuid> = users::table
            .filter(users::role.eq(Role::Admin.as_str()))
            .select(users::id)
            .load(conn)?;
        let managers: Vec<Uuid> = brand_managers::table
            .filter(brand_managers::brand_id.eq(brand.id))
            .select(brand_managers::user_id)
            .load(conn)?;
        let mut recipients = Recipients::excluding(None);
        recipients.extend(admins).extend(managers);

        let requester = task.client_name.as_deref().unwrap_or("A client");
        notify(
            conn,
            &recipients,
            None,
            &Notice::new(
                NotificationType::ClientTaskSubmitted,
                "New client request",
                format!("{requester} requested \"{}\" for {}", task.title, brand.name),
            ),
        )?;
        Ok(task)
    })?;

    info!(client_task_id = %task.id, brand_id = %task.brand_id, "client task submitted");
    Ok((StatusCode::CREATED, Json(task.into())))
}

pub async fn list_client_tasks(
    State(state): State<AppState>,
    Path(brand_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ClientTaskResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_brand(&mut conn, brand_id)?;
    ensure_brand_manager(&mut conn, &caller, brand_id)?;

    let rows: Vec<JsrClientTask> = jsr_client_tasks::table
        .filter(jsr_client_tasks::brand_id.eq(brand_id))
        .order(jsr_client_tasks::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(ClientTaskResponse::from).collect()))
}

pub async fn update_client_task(
    State(state): State<AppState>,
    Path(client_task_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateClientTaskRequest>,
) -> AppResult<Json<ClientTaskResponse>> {
    let mut conn = state.db()?;
    let task = conn.transaction::<JsrClientTask, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let existing: JsrClientTask = jsr_client_tasks::table
            .find(client_task_id)
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("client task"))?;
        ensure_brand_manager(conn, &caller, existing.brand_id)?;

        if let Some(Some(brief_id)) = payload.brief_id {
            let brief = load_brief(conn, brief_id)?;
            if brief.brand_id != Some(existing.brand_id) {
                return Err(AppError::bad_request("brief belongs to another brand"));
            }
        }

        let changes = ClientTaskChangeset {
            status: payload.status.map(|s| s.as_str().to_string()),
            final_deadline: payload
                .final_deadline
                .map(|deadline| deadline.map(|d| d.naive_utc())),
            brief_id: payload.brief_id,
        };
        if changes.status.is_none() && changes.final_deadline.is_none() && changes.brief_id.is_none()
        {
            return Ok(existing);
        }
        Ok(diesel::update(jsr_client_tasks::table.find(client_task_id))
            .set((&changes, jsr_client_tasks::updated_at.eq(now())))
            .get_result(conn)?)
    })?;

    info!(client_task_id = %task.id, status = %task.status, "client task updated");
    Ok(Json(task.into()))
}
