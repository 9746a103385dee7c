use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::access::Caller;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Notification;
use crate::schema::notifications;
use crate::state::AppState;
use crate::utils::time::to_iso;

const LIST_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub triggered_by: Option<Uuid>,
    pub brief_id: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub count: i64,
}

#[derive(Serialize)]
pub struct MarkedResponse {
    pub updated: usize,
}

impl From<Notification> for NotificationResponse {
    fn from(n: Notification) -> Self {
        Self {
            id: n.id,
            notification_type: n.notification_type,
            title: n.title,
            message: n.message,
            is_read: n.is_read,
            triggered_by: n.triggered_by,
            brief_id: n.brief_id,
            task_id: n.task_id,
            created_at: to_iso(n.created_at),
        }
    }
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<ListNotificationsQuery>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<NotificationResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let mut q = notifications::table
        .filter(notifications::recipient_id.eq(caller.id))
        .into_boxed();
    if query.unread_only {
        q = q.filter(notifications::is_read.eq(false));
    }
    let rows: Vec<Notification> = q
        .order(notifications::created_at.desc())
        .limit(LIST_LIMIT)
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(NotificationResponse::from).collect()))
}

pub async fn unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let count: i64 = notifications::table
        .filter(notifications::recipient_id.eq(caller.id))
        .filter(notifications::is_read.eq(false))
        .select(count_star())
        .first(&mut conn)?;
    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::recipient_id.eq(caller.id)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::entity_not_found("notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkedResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::recipient_id.eq(caller.id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;
    Ok(Json(MarkedResponse { updated }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(notification_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    let removed = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::recipient_id.eq(caller.id)),
    )
    .execute(&mut conn)?;

    if removed == 0 {
        return Err(AppError::entity_not_found("notification"));
    }
    Ok(StatusCode::NO_CONTENT)
}
