//! Read-only views of the team broadcast groups.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use hackbox_common::normalize_team;

use crate::gateway::registry::TeamSummary;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/teams", get(list_teams))
        .route("/teams/{team}", get(get_team))
}

#[utoipa::path(
    get,
    path = "/api/v1/teams",
    tag = "Teams",
    responses(
        (status = 200, description = "Teams with live connections", body = [TeamSummary]),
    ),
)]
pub async fn list_teams(State(state): State<AppState>) -> Json<Vec<TeamSummary>> {
    Json(state.groups.snapshot())
}

#[utoipa::path(
    get,
    path = "/api/v1/teams/{team}",
    tag = "Teams",
    params(
        ("team" = String, Path, description = "Team name"),
    ),
    responses(
        (status = 200, description = "Team summary; zero counts for unknown teams", body = TeamSummary),
    ),
)]
pub async fn get_team(
    State(state): State<AppState>,
    Path(team): Path<String>,
) -> Json<TeamSummary> {
    let team = normalize_team(&team).unwrap_or_default();
    Json(state.groups.summary(team))
}
