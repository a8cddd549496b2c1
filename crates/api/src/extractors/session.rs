//! Session token extractors.
//!
//! `SessionUser` only proves who the caller is. `ActiveSession` additionally
//! requires that the user signed in through `POST /session` and hands out
//! the push context of that sign-in.

use std::sync::Arc;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use domain::services::PushSession;
use shared::session_token::SessionTokenError;

use crate::app::AppState;
use crate::error::ApiError;

/// Caller identified by a verified bearer session token.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// User id in the profile store (the token subject).
    pub user_id: String,
    pub email: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("Invalid Authorization header format".to_string())
        })?;

        let claims = state.verifier.verify(token).map_err(|e| match e {
            SessionTokenError::TokenExpired => {
                ApiError::Unauthorized("Session has expired, sign in again".to_string())
            }
            _ => ApiError::Unauthorized("Invalid or expired token".to_string()),
        })?;

        Ok(SessionUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Push context of a signed-in caller.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub user: SessionUser,
    pub session: Arc<PushSession>,
}

#[async_trait]
impl FromRequestParts<AppState> for ActiveSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = SessionUser::from_request_parts(parts, state).await?;
        let session = state.sessions.get(&user.user_id).ok_or_else(|| {
            ApiError::Conflict("No active push session. Sign in to the console first.".to_string())
        })?;
        Ok(ActiveSession { user, session })
    }
}
