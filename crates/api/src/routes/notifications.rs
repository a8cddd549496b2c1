//! Notification history handlers.
//!
//! The badge and the notification panel both read the same local history.
//! Either can subscribe to `/notifications/events` and refetch on change.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use domain::models::NotificationRecord;
use serde::Serialize;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::SessionUser;

/// Response for history listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListNotificationsResponse {
    pub notifications: Vec<NotificationRecord>,
    pub unread_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub unread_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAllReadResponse {
    pub updated: usize,
}

/// Full history, newest first.
///
/// GET /api/v1/notifications
pub async fn list(State(state): State<AppState>, _user: SessionUser) -> Json<ListNotificationsResponse> {
    let history = state.pipeline.history();
    Json(ListNotificationsResponse {
        notifications: history.list_all(),
        unread_count: history.unread_count(),
    })
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(State(state): State<AppState>, _user: SessionUser) -> Json<UnreadCountResponse> {
    Json(UnreadCountResponse {
        unread_count: state.pipeline.history().unread_count(),
    })
}

/// Mark every entry with this id read.
///
/// POST /api/v1/notifications/:id/read
pub async fn mark_read(
    State(state): State<AppState>,
    _user: SessionUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let history = state.pipeline.history();
    if history.mark_read(&id).await {
        return Ok(StatusCode::NO_CONTENT);
    }
    // Already read is not an error, an unknown id is
    if history.list_all().iter().any(|n| n.id == id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Notification not found".to_string()))
    }
}

/// POST /api/v1/notifications/read-all
pub async fn mark_all_read(State(state): State<AppState>, _user: SessionUser) -> Json<MarkAllReadResponse> {
    Json(MarkAllReadResponse {
        updated: state.pipeline.history().mark_all_read().await,
    })
}

/// DELETE /api/v1/notifications/:id
pub async fn delete(
    State(state): State<AppState>,
    _user: SessionUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.pipeline.history().delete(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("Notification not found".to_string()))
    }
}

/// DELETE /api/v1/notifications
pub async fn clear_all(State(state): State<AppState>, _user: SessionUser) -> StatusCode {
    state.pipeline.history().clear_all().await;
    StatusCode::NO_CONTENT
}

/// Stream of history changes as server-sent events.
///
/// GET /api/v1/notifications/events
///
/// Emits one `history` event per change. A subscriber that fell behind gets
/// a `resync` event and should refetch the full list. Keep-alive comments
/// go out every `push.sse_keepalive_secs`.
pub async fn events(
    State(state): State<AppState>,
    _user: SessionUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pipeline.history().subscribe();

    let stream = BroadcastStream::new(rx).map(|message| {
        let event = match message {
            Ok(change) => Event::default()
                .event("history")
                .json_data(&change)
                .unwrap_or_else(|_| Event::default().event("resync")),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "History event subscriber lagged");
                Event::default().event("resync").data(skipped.to_string())
            }
        };
        Ok::<Event, Infallible>(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(state.config.push.sse_keepalive_secs))
            .text("keep-alive"),
    )
}
