use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::Caller;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::fanout::{notify_user, Notice, NotificationType};
use crate::models::{DirectMessage, NewDirectMessage};
use crate::routes::files::ensure_file_exists;
use crate::schema::{direct_messages, users};
use crate::state::AppState;
use crate::utils::json::non_empty;
use crate::utils::time::{now, to_iso, to_iso_opt};

const PREVIEW_CHARS: usize = 80;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub content: String,
    pub file_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub file_id: Option<Uuid>,
    pub read_at: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub user_id: Uuid,
    pub user_name: String,
    pub last_message: MessageResponse,
    pub unread_count: usize,
}

#[derive(Serialize)]
pub struct MarkedResponse {
    pub updated: usize,
}

impl From<DirectMessage> for MessageResponse {
    fn from(m: DirectMessage) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender_id,
            recipient_id: m.recipient_id,
            content: m.content,
            file_id: m.file_id,
            read_at: to_iso_opt(m.read_at),
            created_at: to_iso(m.created_at),
        }
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        return content.to_string();
    }
    let cut: String = content.chars().take(PREVIEW_CHARS).collect();
    format!("{cut}…")
}

pub async fn send_message(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let content = non_empty(Some(payload.content)).unwrap_or_default();
    if content.is_empty() && payload.file_id.is_none() {
        return Err(AppError::bad_request("message must have content or a file"));
    }

    let mut conn = state.db()?;
    let message = conn.transaction::<DirectMessage, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        if payload.recipient_id == caller.id {
            return Err(AppError::bad_request("cannot message yourself"));
        }
        users::table
            .find(payload.recipient_id)
            .select(users::id)
            .first::<Uuid>(conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("recipient"))?;
        if let Some(file_id) = payload.file_id {
            ensure_file_exists(conn, file_id)?;
        }

        let message: DirectMessage = diesel::insert_into(direct_messages::table)
            .values(&NewDirectMessage {
                id: Uuid::new_v4(),
                sender_id: caller.id,
                recipient_id: payload.recipient_id,
                content,
                file_id: payload.file_id,
            })
            .get_result(conn)?;

        let body = if message.content.is_empty() {
            "sent you a file".to_string()
        } else {
            preview(&message.content)
        };
        notify_user(
            conn,
            message.recipient_id,
            caller.id,
            &Notice::new(
                NotificationType::DirectMessage,
                format!("Message from {}", caller.name),
                body,
            ),
        )?;
        Ok(message)
    })?;

    info!(message_id = %message.id, recipient_id = %message.recipient_id, "direct message sent");
    Ok((StatusCode::CREATED, Json(message.into())))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<ConversationResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let rows: Vec<DirectMessage> = direct_messages::table
        .filter(
            direct_messages::sender_id
                .eq(caller.id)
                .or(direct_messages::recipient_id.eq(caller.id)),
        )
        .order(direct_messages::created_at.desc())
        .load(&mut conn)?;

    // Rows arrive newest first, so the first row per counterpart is the
    // latest message of that conversation.
    let mut order: Vec<Uuid> = Vec::new();
    let mut latest: HashMap<Uuid, DirectMessage> = HashMap::new();
    let mut unread: HashMap<Uuid, usize> = HashMap::new();
    for message in rows {
        let counterpart = if message.sender_id == caller.id {
            message.recipient_id
        } else {
            message.sender_id
        };
        if message.recipient_id == caller.id && message.read_at.is_none() {
            *unread.entry(counterpart).or_default() += 1;
        }
        if !latest.contains_key(&counterpart) {
            order.push(counterpart);
            latest.insert(counterpart, message);
        }
    }

    let names: HashMap<Uuid, String> = if order.is_empty() {
        HashMap::new()
    } else {
        users::table
            .filter(users::id.eq_any(&order))
            .select((users::id, users::name))
            .load::<(Uuid, String)>(&mut conn)?
            .into_iter()
            .collect()
    };

    Ok(Json(
        order
            .into_iter()
            .filter_map(|counterpart| {
                let message = latest.remove(&counterpart)?;
                Some(ConversationResponse {
                    user_id: counterpart,
                    user_name: names.get(&counterpart).cloned().unwrap_or_default(),
                    last_message: message.into(),
                    unread_count: unread.get(&counterpart).copied().unwrap_or(0),
                })
            })
            .collect(),
    ))
}

pub async fn thread(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let rows: Vec<DirectMessage> = direct_messages::table
        .filter(
            direct_messages::sender_id
                .eq(caller.id)
                .and(direct_messages::recipient_id.eq(other_id))
                .or(direct_messages::sender_id
                    .eq(other_id)
                    .and(direct_messages::recipient_id.eq(caller.id))),
        )
        .order(direct_messages::created_at.asc())
        .load(&mut conn)?;

    Ok(Json(rows.into_iter().map(MessageResponse::from).collect()))
}

pub async fn mark_thread_read(
    State(state): State<AppState>,
    Path(other_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<MarkedResponse>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;

    let updated = diesel::update(
        direct_messages::table
            .filter(direct_messages::sender_id.eq(other_id))
            .filter(direct_messages::recipient_id.eq(caller.id))
            .filter(direct_messages::read_at.is_null()),
    )
    .set(direct_messages::read_at.eq(Some(now())))
    .execute(&mut conn)?;

    Ok(Json(MarkedResponse { updated }))
}
