//! Device registry handlers.
//!
//! Every mutation goes through the token lifecycle coordinator so the
//! session's registration state stays in step with the registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use domain::models::{DeviceSummary, RegisterDeviceRequest, UpdateDeviceRequest};
use domain::services::{ConsolidationReport, SyncReport};
use serde::Serialize;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::ActiveSession;
use crate::middleware::metrics::record_duplicates_removed;

/// Response for device listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDevicesResponse {
    pub devices: Vec<DeviceSummary>,
}

/// Response for a forced token refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub device: DeviceSummary,
    pub replaced: usize,
    pub stale_remaining: usize,
}

/// Response for a consolidation pass.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidateResponse {
    #[serde(flatten)]
    pub report: ConsolidationReport,
    pub message: String,
}

/// List the user's devices, most recently seen first.
///
/// GET /api/v1/devices
pub async fn list_devices(
    State(state): State<AppState>,
    active: ActiveSession,
) -> Result<Json<ListDevicesResponse>, ApiError> {
    let current = active.session.current_token();
    let devices = state
        .coordinator
        .registry()
        .list_devices(&active.user.user_id)
        .await?
        .into_iter()
        .map(|record| DeviceSummary::from_record(record, current.as_deref()))
        .collect();

    Ok(Json(ListDevicesResponse { devices }))
}

/// Opt the current device in.
///
/// POST /api/v1/devices/enable
///
/// Prompts for permission, acquires a delivery token and registers it.
pub async fn enable(
    State(state): State<AppState>,
    active: ActiveSession,
    Json(request): Json<RegisterDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceSummary>), ApiError> {
    request.validate()?;

    let record = state
        .coordinator
        .enable(&active.session, request.name)
        .await?;
    let current = active.session.current_token();

    Ok((
        StatusCode::CREATED,
        Json(DeviceSummary::from_record(record, current.as_deref())),
    ))
}

/// Replace every registered token of the user with a fresh one.
///
/// POST /api/v1/devices/refresh
pub async fn refresh(
    State(state): State<AppState>,
    active: ActiveSession,
) -> Result<Json<RefreshResponse>, ApiError> {
    let outcome = state.coordinator.refresh(&active.session).await?;
    let current = active.session.current_token();

    Ok(Json(RefreshResponse {
        device: DeviceSummary::from_record(outcome.record, current.as_deref()),
        replaced: outcome.replaced,
        stale_remaining: outcome.stale_remaining,
    }))
}

/// Remove duplicate records of the same physical device.
///
/// POST /api/v1/devices/consolidate
pub async fn consolidate(
    State(state): State<AppState>,
    active: ActiveSession,
) -> Result<Json<ConsolidateResponse>, ApiError> {
    let report = state.coordinator.consolidate(&active.session).await?;
    record_duplicates_removed(report.removed, report.failed);

    Ok(Json(ConsolidateResponse {
        message: report.message(),
        report,
    }))
}

/// Resolve the registration state of the current device.
///
/// GET /api/v1/devices/state
///
/// Called when the settings surface loads. Also runs a consolidation pass.
pub async fn sync_state(
    State(state): State<AppState>,
    active: ActiveSession,
) -> Result<Json<SyncReport>, ApiError> {
    let report = state.coordinator.sync_state(&active.session).await?;
    if let Some(consolidation) = &report.consolidation {
        record_duplicates_removed(consolidation.removed, consolidation.failed);
    }
    Ok(Json(report))
}

/// Disable notifications on the current device entirely.
///
/// DELETE /api/v1/devices/current
pub async fn disable_all(
    State(state): State<AppState>,
    active: ActiveSession,
) -> Result<StatusCode, ApiError> {
    state.coordinator.unregister(&active.session).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle and/or rename one device.
///
/// PATCH /api/v1/devices/:token
pub async fn update_device(
    State(state): State<AppState>,
    active: ActiveSession,
    Path(token): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> Result<Json<DeviceSummary>, ApiError> {
    request.validate()?;
    if request.enabled.is_none() && request.name.is_none() {
        return Err(ApiError::validation(
            "Provide enabled and/or name to update",
        ));
    }

    let mut record = None;
    if let Some(name) = &request.name {
        record = Some(state.coordinator.rename(&active.session, &token, name).await?);
    }
    if let Some(enabled) = request.enabled {
        record = Some(
            state
                .coordinator
                .set_enabled(&active.session, &token, enabled)
                .await?,
        );
    }

    let record = record.ok_or_else(|| ApiError::Internal("update produced no record".into()))?;
    let current = active.session.current_token();
    Ok(Json(DeviceSummary::from_record(record, current.as_deref())))
}

/// Remove one device. Removing an unknown device succeeds.
///
/// DELETE /api/v1/devices/:token
pub async fn remove_device(
    State(state): State<AppState>,
    active: ActiveSession,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .coordinator
        .remove_device(&active.session, &token)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
