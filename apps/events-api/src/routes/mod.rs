pub mod events;
pub mod health;
pub mod teams;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", events::router().merge(teams::router()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Events
        events::publish_event,
        // Teams
        teams::list_teams,
        teams::get_team,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Route request/response types
            health::HealthResponse,
            events::PublishEventRequest,
            events::PublishEventResponse,
            events::FailedDelivery,
            crate::gateway::registry::TeamSummary,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Events", description = "Publish events to team connections"),
        (name = "Teams", description = "Team broadcast groups"),
    )
)]
pub struct ApiDoc;
