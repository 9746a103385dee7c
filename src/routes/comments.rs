use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::access::{can_edit_comment, ensure, Caller};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::fanout::{
    log_activity, notify, Notice, NotificationType, Recipients, ACTIVITY_COMMENT_ADDED,
    ACTIVITY_COMMENT_DELETED, ACTIVITY_COMMENT_UPDATED,
};
use crate::models::{Comment, NewComment};
use crate::routes::briefs::load_visible_brief;
use crate::routes::tasks::load_task;
use crate::schema::{comments, users};
use crate::state::AppState;
use crate::utils::time::{now, to_iso};

#[derive(Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
    pub task_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub brief_id: Uuid,
    pub task_id: Option<Uuid>,
    pub author_id: Uuid,
    /// `None` once the author's account has been deleted.
    pub author_name: Option<String>,
    pub content: String,
    pub created_at: String,
    pub updated_at: String,
}

fn to_response(comment: Comment, author_name: Option<String>) -> CommentResponse {
    CommentResponse {
        id: comment.id,
        brief_id: comment.brief_id,
        task_id: comment.task_id,
        author_id: comment.author_id,
        author_name,
        content: comment.content,
        created_at: to_iso(comment.created_at),
        updated_at: to_iso(comment.updated_at),
    }
}

fn validate_content(content: &str) -> AppResult<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("content must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn load_comment(conn: &mut PgConnection, comment_id: Uuid) -> AppResult<Comment> {
    comments::table
        .find(comment_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("comment"))
}

pub async fn list_comments(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<CommentResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    load_visible_brief(&mut conn, &caller, brief_id)?;

    let rows: Vec<(Comment, Option<String>)> = comments::table
        .left_join(users::table.on(users::id.eq(comments::author_id)))
        .filter(comments::brief_id.eq(brief_id))
        .order(comments::created_at.asc())
        .select((comments::all_columns, users::name.nullable()))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(comment, author)| to_response(comment, author))
            .collect(),
    ))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(brief_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<CommentResponse>)> {
    let content = validate_content(&payload.content)?;
    let mut conn = state.db()?;

    let response = conn.transaction::<CommentResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let brief = load_visible_brief(conn, &caller, brief_id)?;

        let task = match payload.task_id {
            Some(task_id) => {
                let task = load_task(conn, task_id)?;
                if task.brief_id != brief_id {
                    return Err(AppError::bad_request("task does not belong to this brief"));
                }
                Some(task)
            }
            None => None,
        };

        let comment: Comment = diesel::insert_into(comments::table)
            .values(&NewComment {
                id: Uuid::new_v4(),
                brief_id,
                task_id: payload.task_id,
                author_id: caller.id,
                content,
            })
            .get_result(conn)?;

        log_activity(
            conn,
            brief_id,
            Some(caller.id),
            ACTIVITY_COMMENT_ADDED,
            json!({ "comment_id": comment.id, "task_id": comment.task_id }),
        )?;

        let mut recipients = Recipients::excluding(Some(caller.id));
        if let Some(manager) = brief.assigned_manager_id {
            recipients.add(manager);
        }
        let notice = match &task {
            Some(task) => {
                recipients.add(task.assignee_id);
                Notice::new(
                    NotificationType::CommentAdded,
                    "New comment",
                    format!("{} commented on \"{}\"", caller.name, task.title),
                )
                .task(brief_id, task.id)
            }
            None => Notice::new(
                NotificationType::CommentAdded,
                "New comment",
                format!("{} commented on \"{}\"", caller.name, brief.title),
            )
            .brief(brief_id),
        };
        notify(conn, &recipients, Some(caller.id), &notice)?;

        Ok(to_response(comment, Some(caller.name)))
    })?;

    info!(comment_id = %response.id, brief_id = %brief_id, "comment added");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn update_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateCommentRequest>,
) -> AppResult<Json<CommentResponse>> {
    let content = validate_content(&payload.content)?;
    let mut conn = state.db()?;

    let response = conn.transaction::<CommentResponse, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let comment = load_comment(conn, comment_id)?;
        ensure(can_edit_comment(&caller, &comment))?;

        let updated: Comment = diesel::update(comments::table.find(comment_id))
            .set((comments::content.eq(content.clone()), comments::updated_at.eq(now())))
            .get_result(conn)?;

        log_activity(
            conn,
            comment.brief_id,
            Some(caller.id),
            ACTIVITY_COMMENT_UPDATED,
            json!({
                "comment_id": comment_id,
                "task_id": comment.task_id,
                "content": { "from": comment.content, "to": content },
            }),
        )?;

        let author: Option<String> = users::table
            .find(updated.author_id)
            .select(users::name)
            .first(conn)
            .optional()?;
        Ok(to_response(updated, author))
    })?;

    info!(comment_id = %comment_id, "comment updated");
    Ok(Json(response))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        let comment = load_comment(conn, comment_id)?;
        ensure(can_edit_comment(&caller, &comment))?;
        diesel::delete(comments::table.find(comment_id)).execute(conn)?;

        log_activity(
            conn,
            comment.brief_id,
            Some(caller.id),
            ACTIVITY_COMMENT_DELETED,
            json!({
                "comment_id": comment_id,
                "task_id": comment.task_id,
                "content": comment.content,
            }),
        )?;
        Ok(())
    })?;

    info!(comment_id = %comment_id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}
