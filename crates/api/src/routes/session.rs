//! Push session handlers.
//!
//! The console calls these on sign-in and sign-out. A push session carries
//! the device environment used for device records and consolidation.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use domain::models::DeviceEnvironment;
use domain::services::RegistrationState;
use serde::Serialize;
use tracing::info;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::SessionUser;

/// Response for a started session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user_id: String,
    pub state: RegistrationState,
    pub started_at: DateTime<Utc>,
}

/// Start a push session for the signed-in user.
///
/// POST /api/v1/session
///
/// Replaces any earlier session of the same user. The registration state
/// starts as UNREGISTERED until `GET /devices/state` resolves it.
pub async fn sign_in(
    State(state): State<AppState>,
    user: SessionUser,
    Json(environment): Json<DeviceEnvironment>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    environment.validate()?;

    let session = state.sessions.sign_in(&user.user_id, environment);
    info!(user_id = %user.user_id, "Console signed in");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            user_id: session.user_id().to_string(),
            state: session.state(),
            started_at: session.started_at(),
        }),
    ))
}

/// End the push session of the signed-in user.
///
/// DELETE /api/v1/session
///
/// Device records stay registered; only the in-memory context is dropped.
pub async fn sign_out(State(state): State<AppState>, user: SessionUser) -> StatusCode {
    if state.sessions.sign_out(&user.user_id).is_some() {
        info!(user_id = %user.user_id, "Console signed out");
    }
    StatusCode::NO_CONTENT
}
