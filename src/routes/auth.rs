use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    access::Role,
    auth::{
        password::{self, MIN_PASSWORD_LENGTH},
        tokens::{generate_opaque_token, hash_opaque_token},
        AuthenticatedUser,
    },
    error::{AppError, AppResult},
    models::{Invite, NewRefreshToken, NewUser, RefreshToken, User},
    routes::users::{load_user, UserResponse},
    schema::{invites, refresh_tokens, users},
    state::AppState,
    utils::{json::non_empty, time::now},
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub designation: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct AcceptInviteRequest {
    pub token: String,
    pub name: String,
    pub password: String,
    pub designation: Option<String>,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

type SessionResponse = (HeaderMap, Json<LoginResponse>);

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn validate_credentials(name: &str, email: &str, password: &str) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email address"));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::bad_request(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn insert_user(
    conn: &mut PgConnection,
    name: &str,
    email: String,
    password_hash: String,
    role: Role,
    designation: Option<String>,
) -> AppResult<User> {
    let taken = users::table
        .filter(users::email.eq(&email))
        .select(users::id)
        .first::<Uuid>(conn)
        .optional()?;
    if taken.is_some() {
        return Err(AppError::conflict("email already registered"));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        name: name.trim().to_string(),
        email,
        password_hash,
        role: role.as_str().to_string(),
        designation: non_empty(designation),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(conn)?;
    load_user(conn, new_user.id)
}

/// Issues an access token and a fresh refresh cookie for `user`.
fn issue_session(
    conn: &mut PgConnection,
    state: &AppState,
    user: &User,
) -> AppResult<SessionResponse> {
    let access_token = state
        .jwt
        .issue(user)
        .map_err(AppError::from)?;

    let issued = Utc::now();
    let refresh_value = generate_opaque_token();
    let refresh_expires_at = issued + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id: user.id,
        token_hash: hash_opaque_token(&refresh_value),
        issued_at: issued.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };
    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(state, &refresh_value, refresh_expires_at)?,
    );

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.ttl_seconds(),
        }),
    ))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<SessionResponse> {
    let email = normalize_email(&payload.email);
    validate_credentials(&payload.name, &email, &payload.password)?;
    let password_hash = password::hash_password(&payload.password)?;

    let mut conn = state.db()?;
    let (user, session) = conn.transaction::<_, AppError, _>(|conn| {
        let existing: i64 = users::table.select(count_star()).first(conn)?;
        let role = if existing == 0 {
            Role::Admin
        } else if state.config.allow_open_signup {
            Role::Employee
        } else {
            return Err(AppError::forbidden_because("sign-up is invite only"));
        };

        let user = insert_user(
            conn,
            &payload.name,
            email,
            password_hash,
            role,
            payload.designation,
        )?;
        let session = issue_session(conn, &state, &user)?;
        Ok((user, session))
    })?;

    info!(user_id = %user.id, role = %user.role, "user signed up");
    Ok(session)
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<SessionResponse> {
    let mut conn = state.db()?;
    let email = normalize_email(&payload.email);

    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    issue_session(&mut conn, &state, &user)
}

pub async fn accept_invite(
    State(state): State<AppState>,
    Json(payload): Json<AcceptInviteRequest>,
) -> AppResult<SessionResponse> {
    let mut conn = state.db()?;
    let token_hash = hash_opaque_token(payload.token.trim());

    let (user, session) = conn.transaction::<_, AppError, _>(|conn| {
        let invite: Invite = invites::table
            .filter(invites::token_hash.eq(&token_hash))
            .filter(invites::accepted_at.is_null())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::entity_not_found("invite"))?;

        validate_credentials(&payload.name, &invite.email, &payload.password)?;
        let role = Role::parse(&invite.role)
            .ok_or_else(|| AppError::internal(format!("unknown role '{}'", invite.role)))?;
        let password_hash = password::hash_password(&payload.password)?;

        let user = insert_user(
            conn,
            &payload.name,
            invite.email.clone(),
            password_hash,
            role,
            payload.designation.clone(),
        )?;
        diesel::update(invites::table.find(invite.id))
            .set(invites::accepted_at.eq(now()))
            .execute(conn)?;

        let session = issue_session(conn, &state, &user)?;
        Ok((user, session))
    })?;

    info!(user_id = %user.id, role = %user.role, "invite accepted");
    Ok(session)
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<SessionResponse> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_opaque_token(refresh_value);
    let mut conn = state.db()?;

    conn.transaction::<_, AppError, _>(|conn| {
        let now_naive = now();
        let token: RefreshToken = refresh_tokens::table
            .filter(refresh_tokens::token_hash.eq(&hashed))
            .filter(refresh_tokens::revoked_at.is_null())
            .filter(refresh_tokens::expires_at.gt(now_naive))
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        diesel::update(refresh_tokens::table.find(token.id))
            .set((
                refresh_tokens::revoked_at.eq(now_naive),
                refresh_tokens::updated_at.eq(now_naive),
            ))
            .execute(conn)?;

        let user: User = users::table
            .find(token.user_id)
            .first(conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        issue_session(conn, &state, &user)
    })
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;
    let now_naive = now();
    let mut rows_affected = 0;

    if let Some(value) = jar.as_ref().and_then(|cookies| cookies.get(REFRESH_COOKIE_NAME)) {
        rows_affected = diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::token_hash.eq(hash_opaque_token(value)))
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now_naive),
            refresh_tokens::updated_at.eq(now_naive),
        ))
        .execute(&mut conn)?;
    }

    if rows_affected == 0 {
        diesel::update(
            refresh_tokens::table
                .filter(refresh_tokens::user_id.eq(user.user_id))
                .filter(refresh_tokens::revoked_at.is_null()),
        )
        .set((
            refresh_tokens::revoked_at.eq(now_naive),
            refresh_tokens::updated_at.eq(now_naive),
        ))
        .execute(&mut conn)?;
    }

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let row: User = users::table
        .find(user.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    Ok(Json(row.into()))
}

fn cookie_attributes(state: &AppState, parts: &mut Vec<String>) {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    cookie_attributes(state, &mut parts);
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    cookie_attributes(state, &mut parts);
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}
