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

use crate::access::{ensure, require_staff, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{BriefTemplate, NewBriefTemplate};
use crate::routes::briefs::{detail, insert_brief, BriefDetailResponse, BriefDraft};
use crate::routes::tasks::{insert_task, TaskDraft};
use crate::schema::brief_templates;
use crate::state::AppState;
use crate::utils::json::non_empty;
use crate::utils::time::to_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateTask {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub duration_minutes: i32,
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tasks: Vec<TemplateTask>,
}

#[derive(Deserialize)]
pub struct InstantiateTemplateRequest {
    pub title: String,
    pub brand_id: Option<Uuid>,
    pub assigned_manager_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub assignee_id: Uuid,
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub tasks: Vec<TemplateTask>,
    pub created_by: Uuid,
    pub created_at: String,
    pub updated_at: String,
}

fn template_tasks(template: &BriefTemplate) -> AppResult<Vec<TemplateTask>> {
    Ok(serde_json::from_value(template.tasks.clone())?)
}

fn to_response(template: BriefTemplate) -> AppResult<TemplateResponse> {
    let tasks = template_tasks(&template)?;
    Ok(TemplateResponse {
        id: template.id,
        name: template.name,
        description: template.description,
        tasks,
        created_by: template.created_by,
        created_at: to_iso(template.created_at),
        updated_at: to_iso(template.updated_at),
    })
}

fn load_template(conn: &mut PgConnection, template_id: Uuid) -> AppResult<BriefTemplate> {
    brief_templates::table
        .find(template_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("template"))
}

fn normalize_tasks(tasks: Vec<TemplateTask>) -> AppResult<Vec<TemplateTask>> {
    tasks
        .into_iter()
        .map(|task| {
            let title = task.title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::bad_request("template task title must not be empty"));
            }
            if task.duration_minutes < 0 {
                return Err(AppError::bad_request(
                    "template task duration_minutes must not be negative",
                ));
            }
            Ok(TemplateTask {
                title,
                description: non_empty(task.description),
                duration_minutes: task.duration_minutes,
            })
        })
        .collect()
}

pub async fn list_templates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TemplateResponse>>> {
    let mut conn = state.db()?;
    Caller::resolve(&mut conn, &user)?;
    let rows: Vec<BriefTemplate> = brief_templates::table
        .order(brief_templates::name.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(to_response)
            .collect::<AppResult<Vec<_>>>()?,
    ))
}

pub async fn create_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateResponse>)> {
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let tasks = normalize_tasks(payload.tasks)?;

    let mut conn = state.db()?;
    let template = conn.transaction::<BriefTemplate, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;

        Ok(diesel::insert_into(brief_templates::table)
            .values(&NewBriefTemplate {
                id: Uuid::new_v4(),
                name,
                description: non_empty(payload.description),
                tasks: serde_json::to_value(&tasks)?,
                created_by: caller.id,
            })
            .get_result(conn)?)
    })?;

    info!(template_id = %template.id, tasks = tasks.len(), "template created");
    Ok((StatusCode::CREATED, Json(to_response(template)?)))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let template = load_template(conn, template_id)?;
        ensure(caller.is_admin() || template.created_by == caller.id)?;
        diesel::delete(brief_templates::table.find(template_id)).execute(conn)?;
        Ok(())
    })?;

    info!(template_id = %template_id, "template deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn instantiate_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<InstantiateTemplateRequest>,
) -> AppResult<(StatusCode, Json<BriefDetailResponse>)> {
    let mut conn = state.db()?;
    let response = conn.transaction::<BriefDetailResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_staff(&caller)?;
        let template = load_template(conn, template_id)?;
        let tasks = template_tasks(&template)?;

        let brief = insert_brief(
            conn,
            &caller,
            BriefDraft {
                title: payload.title,
                description: template.description.clone(),
                brand_id: payload.brand_id,
                assigned_manager_id: payload.assigned_manager_id,
                deadline: payload.deadline,
                team_ids: Vec::new(),
            },
        )?;
        for task in tasks {
            insert_task(
                conn,
                &caller,
                &brief,
                TaskDraft {
                    title: task.title,
                    description: task.description,
                    assignee_id: payload.assignee_id,
                    duration_minutes: task.duration_minutes,
                    deadline: None,
                    blocked_by: Vec::new(),
                },
            )?;
        }
        detail(conn, brief)
    })?;

    info!(
        template_id = %template_id,
        brief_id = %response.brief.id,
        tasks = response.tasks.len(),
        "template instantiated"
    );
    Ok((StatusCode::CREATED, Json(response)))
}
