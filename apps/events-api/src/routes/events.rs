//! Producer endpoint: publish an event to every connection of a team.

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use hackbox_common::normalize_team;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::gateway::fanout::GroupEvent;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/teams/{team}/events", post(publish_event))
}

// ---------------------------------------------------------------------------
// POST /api/v1/teams/:team/events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishEventRequest {
    /// Dispatch event name, e.g. `SCOREBOARD_UPDATE`.
    pub event: String,
    /// Passed through to clients untouched.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FailedDelivery {
    pub connection_id: String,
    /// `queue_full` or `closed`.
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublishEventResponse {
    pub team: String,
    pub delivered: usize,
    pub failed: Vec<FailedDelivery>,
}

#[utoipa::path(
    post,
    path = "/api/v1/teams/{team}/events",
    tag = "Events",
    params(
        ("team" = String, Path, description = "Team name"),
    ),
    request_body = PublishEventRequest,
    responses(
        (status = 200, description = "Event fanned out", body = PublishEventResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
    ),
)]
pub async fn publish_event(
    State(state): State<AppState>,
    Path(team): Path<String>,
    Json(body): Json<PublishEventRequest>,
) -> Result<Json<PublishEventResponse>, ApiError> {
    let team = normalize_team(&team).map(str::to_string);
    let event = body.event.trim().to_string();

    let mut errors = Vec::new();
    if team.is_none() {
        errors.push(FieldError {
            field: "team".to_string(),
            message: "Team is required".to_string(),
        });
    }
    if event.is_empty() {
        errors.push(FieldError {
            field: "event".to_string(),
            message: "Event name is required".to_string(),
        });
    }
    let Some(team) = team.filter(|_| errors.is_empty()) else {
        return Err(ApiError::validation(errors));
    };

    let report = state
        .groups
        .broadcast(&team, GroupEvent::new(team.clone(), event.clone(), body.data));

    tracing::debug!(
        %team,
        %event,
        delivered = report.delivered,
        failed = report.failed.len(),
        "event published"
    );

    Ok(Json(PublishEventResponse {
        team,
        delivered: report.delivered,
        failed: report
            .failed
            .into_iter()
            .map(|(connection_id, err)| FailedDelivery {
                connection_id,
                reason: err.as_str().to_string(),
            })
            .collect(),
    }))
}
