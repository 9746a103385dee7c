use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{require_admin, Caller, Role};
use crate::auth::{tokens::generate_opaque_token, tokens::hash_opaque_token, AuthenticatedUser};
use crate::error::{AppError, AppResult};
use crate::models::{Invite, NewInvite};
use crate::schema::{invites, users};
use crate::state::AppState;
use crate::utils::time::to_iso;

#[derive(Deserialize)]
pub struct CreateInviteRequest {
    pub email: String,
    pub role: Role,
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub invited_by: Uuid,
    pub created_at: String,
}

/// Returned once at creation; only the hash is stored.
#[derive(Serialize)]
pub struct CreatedInviteResponse {
    #[serde(flatten)]
    pub invite: InviteResponse,
    pub token: String,
}

impl From<Invite> for InviteResponse {
    fn from(invite: Invite) -> Self {
        Self {
            id: invite.id,
            email: invite.email,
            role: invite.role,
            invited_by: invite.invited_by,
            created_at: to_iso(invite.created_at),
        }
    }
}

pub async fn list_invites(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<InviteResponse>>> {
    let mut conn = state.db()?;
    let caller = Caller::resolve(&mut conn, &user)?;
    require_admin(&caller)?;

    let pending: Vec<Invite> = invites::table
        .filter(invites::accepted_at.is_null())
        .order(invites::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(pending.into_iter().map(InviteResponse::from).collect()))
}

pub async fn create_invite(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateInviteRequest>,
) -> AppResult<(StatusCode, Json<CreatedInviteResponse>)> {
    let email = payload.email.trim().to_ascii_lowercase();
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email address"));
    }

    let mut conn = state.db()?;
    let token = generate_opaque_token();

    let invite = conn.transaction::<Invite, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;

        let registered = users::table
            .filter(users::email.eq(&email))
            .select(users::id)
            .first::<Uuid>(conn)
            .optional()?;
        if registered.is_some() {
            return Err(AppError::conflict("email already registered"));
        }

        // A new invite supersedes any pending one for the same address.
        diesel::delete(
            invites::table
                .filter(invites::email.eq(&email))
                .filter(invites::accepted_at.is_null()),
        )
        .execute(conn)?;

        let new_invite = NewInvite {
            id: Uuid::new_v4(),
            email: email.clone(),
            role: payload.role.as_str().to_string(),
            token_hash: hash_opaque_token(&token),
            invited_by: caller.id,
        };
        diesel::insert_into(invites::table)
            .values(&new_invite)
            .get_result(conn)
            .map_err(AppError::from)
    })?;

    info!(invite_id = %invite.id, role = %invite.role, "invite created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedInviteResponse {
            invite: invite.into(),
            token,
        }),
    ))
}

pub async fn delete_invite(
    State(state): State<AppState>,
    Path(invite_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;

        let removed = diesel::delete(invites::table.find(invite_id)).execute(conn)?;
        if removed == 0 {
            return Err(AppError::entity_not_found("invite"));
        }
        Ok(())
    })?;
    Ok(StatusCode::NO_CONTENT)
}
