use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access::{require_admin, Caller, Role};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::routes::files::ensure_file_exists;
use crate::schema::{brand_managers, notifications, refresh_tokens, time_entries, user_teams, users};
use crate::state::AppState;
use crate::utils::json::double_option;
use crate::utils::time::{now, to_iso};

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub designation: Option<String>,
    pub avatar_file_id: Option<Uuid>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            designation: user.designation,
            avatar_file_id: user.avatar_file_id,
            created_at: to_iso(user.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub designation: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub avatar_file_id: Option<Option<Uuid>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct ProfileChangeset {
    name: Option<String>,
    designation: Option<Option<String>>,
    avatar_file_id: Option<Option<Uuid>>,
}

#[derive(Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

pub(crate) fn load_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::entity_not_found("user"))
}

pub(crate) fn admin_count(conn: &mut PgConnection) -> AppResult<i64> {
    Ok(users::table
        .filter(users::role.eq(Role::Admin.as_str()))
        .select(count_star())
        .first(conn)?)
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = state.db()?;
    Caller::resolve(&mut conn, &user)?;

    let rows: Vec<User> = users::table.order(users::name.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    Caller::resolve(&mut conn, &user)?;
    Ok(Json(load_user(&mut conn, user_id)?.into()))
}

pub async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;

    let updated = conn.transaction::<User, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;

        let mut changes = ProfileChangeset::default();
        if let Some(name) = payload.name {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("name must not be empty"));
            }
            changes.name = Some(trimmed.to_string());
        }
        if let Some(designation) = payload.designation {
            changes.designation = Some(designation.map(|d| d.trim().to_string()));
        }
        if let Some(Some(file_id)) = payload.avatar_file_id {
            ensure_file_exists(conn, file_id)?;
        }
        changes.avatar_file_id = payload.avatar_file_id;

        if changes.name.is_none() && changes.designation.is_none() && changes.avatar_file_id.is_none() {
            return load_user(conn, caller.id);
        }

        diesel::update(users::table.find(caller.id))
            .set((&changes, users::updated_at.eq(now())))
            .execute(conn)?;
        load_user(conn, caller.id)
    })?;

    Ok(Json(updated.into()))
}

pub async fn update_role(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateRoleRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;

    let updated = conn.transaction::<User, AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;

        let target = load_user(conn, user_id)?;
        let demoting_admin =
            target.role == Role::Admin.as_str() && payload.role != Role::Admin;
        if demoting_admin && admin_count(conn)? <= 1 {
            return Err(AppError::bad_request("cannot demote the last admin"));
        }

        diesel::update(users::table.find(user_id))
            .set((
                users::role.eq(payload.role.as_str()),
                users::updated_at.eq(now()),
            ))
            .execute(conn)?;

        if payload.role == Role::Employee {
            diesel::delete(brand_managers::table.filter(brand_managers::user_id.eq(user_id)))
                .execute(conn)?;
        }

        load_user(conn, user_id)
    })?;

    info!(user_id = %updated.id, role = %updated.role, "user role changed");
    Ok(Json(updated.into()))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    user: AuthenticatedUser,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    conn.transaction::<(), AppError, _>(|conn| {
        let caller = Caller::resolve(conn, &user)?;
        require_admin(&caller)?;

        let target = load_user(conn, user_id)?;
        if target.role == Role::Admin.as_str() && admin_count(conn)? <= 1 {
            return Err(AppError::bad_request("cannot delete the last admin"));
        }

        diesel::delete(user_teams::table.filter(user_teams::user_id.eq(user_id))).execute(conn)?;
        diesel::delete(brand_managers::table.filter(brand_managers::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(notifications::table.filter(notifications::recipient_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(refresh_tokens::table.filter(refresh_tokens::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(time_entries::table.filter(time_entries::user_id.eq(user_id)))
            .execute(conn)?;
        diesel::delete(users::table.find(user_id)).execute(conn)?;
        Ok(())
    })?;

    info!(user_id = %user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}
