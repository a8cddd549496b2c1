//! Delivery intake handlers.
//!
//! The foreground page and the background worker post every push message
//! they receive here. Both land in the same dedup check, so a notification
//! seen by both is recorded once.

use axum::{extract::State, Json};
use domain::models::{DeliverySource, IncomingNotification};
use domain::services::DeliveryOutcome;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::SessionUser;
use crate::middleware::metrics::record_delivery;

/// Most notifications accepted in one reconcile batch.
const MAX_RECONCILE_BATCH: usize = 100;

/// One raw push message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub source: DeliverySource,
    /// Provider payload, either the full envelope or the bare data map.
    pub data: Value,
}

/// Notifications found pending when the console opens.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub notifications: Vec<IncomingNotification>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub accepted: usize,
    pub suppressed: usize,
    pub outcomes: Vec<DeliveryOutcome>,
}

/// Run one push message through dedup and into the history.
///
/// POST /api/v1/deliveries
///
/// Data-only messages without a title or body are rejected.
pub async fn receive(
    State(state): State<AppState>,
    _user: SessionUser,
    Json(request): Json<DeliveryRequest>,
) -> Result<Json<DeliveryOutcome>, ApiError> {
    let incoming = IncomingNotification::from_push_data(&request.data).ok_or_else(|| {
        ApiError::validation("Push message carries no displayable notification")
    })?;

    let outcome = state.pipeline.receive(incoming, request.source).await;
    record_delivery(request.source, &outcome);
    if let DeliveryOutcome::Duplicate { fingerprint } = &outcome {
        debug!(source = %request.source, fingerprint = %fingerprint, "Duplicate delivery suppressed");
    }

    Ok(Json(outcome))
}

/// Reconcile notifications delivered while the console was closed.
///
/// POST /api/v1/deliveries/reconcile
pub async fn reconcile(
    State(state): State<AppState>,
    _user: SessionUser,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    if request.notifications.len() > MAX_RECONCILE_BATCH {
        return Err(ApiError::validation(format!(
            "At most {} notifications per reconcile batch",
            MAX_RECONCILE_BATCH
        )));
    }

    let outcomes = state
        .pipeline
        .reconcile_on_open(request.notifications)
        .await;
    for outcome in &outcomes {
        record_delivery(DeliverySource::OnOpen, outcome);
    }

    let accepted = outcomes.iter().filter(|o| o.is_accepted()).count();
    Ok(Json(ReconcileResponse {
        accepted,
        suppressed: outcomes.len() - accepted,
        outcomes,
    }))
}
