pub mod jwt;
pub mod password;
pub mod tokens;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

/// Identity proven by a bearer token. `role_at_issue` may be stale; use
/// [`crate::access::Caller::resolve`] before any permission check.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub name: String,
    pub role_at_issue: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;
        let claims = state
            .jwt
            .verify(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let user = AuthenticatedUser {
            user_id: claims.sub,
            name: claims.name,
            role_at_issue: claims.role,
        };
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}
