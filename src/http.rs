// http.rs
//
// REST surface: polling-style reads, command entry points and the
// irrigation history query. Unlike the controller socket, every command
// path here reports its failures explicitly.

use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use validator::Validate;

use crate::error::HubError;
use crate::history::{HistoryRecord, HistoryScope};
use crate::models::{AppState, RobotStatus, RobotsState, ShuttersState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Redirect::permanent("/docs") }))
        .route("/health", get(health))
        .route("/api/state", get(get_state))
        .route("/api/command", post(post_command))
        .route("/api/schedules", get(get_schedules))
        .route("/api/robots", get(get_robots))
        .route("/api/robots/{id}", get(get_robot))
        .route("/api/robots/{id}/command", post(post_robot_command))
        .route("/api/history/irrigation", get(get_irrigation_history))
        .route("/ws/shutters", get(crate::handlers::shutters_device_ws))
        .route("/ws/irrigation", get(crate::handlers::irrigation_device_ws))
        .route("/ws/robots", get(crate::handlers::robots_device_ws))
        .route("/ws/app", get(crate::handlers::controller_ws))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", crate::docs::ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub shutters_connected: bool,
    pub irrigation_connected: bool,
    pub robots_connected: bool,
    #[schema(value_type = String)]
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CommandRequest {
    pub token: String,
    pub action: String,
    #[validate(range(min = 1, max = 4))]
    pub channel: Option<u8>,
    #[validate(range(min = 0, max = 100))]
    pub value: Option<u8>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RobotCommandRequest {
    pub token: String,
    pub command: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommandResponse {
    pub success: bool,
    pub command: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScheduleAck {
    pub success: bool,
    /// The request was sent to the device; no response correlation exists.
    pub requested: bool,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Liveness summary per device class", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let health = state.hub.health();
    Json(HealthResponse {
        status: "ok".to_string(),
        shutters_connected: health.shutters_connected,
        irrigation_connected: health.irrigation_connected,
        robots_connected: health.robots_connected,
        last_update: health.last_update,
    })
}

#[utoipa::path(
    get,
    path = "/api/state",
    responses((status = 200, description = "Current shutters snapshot", body = ShuttersState))
)]
pub async fn get_state(State(state): State<AppState>) -> Json<ShuttersState> {
    Json(state.hub.snapshot_shutters())
}

#[utoipa::path(
    post,
    path = "/api/command",
    request_body = CommandRequest,
    responses(
        (status = 200, body = CommandResponse),
        (status = 401, description = "Invalid token"),
        (status = 503, description = "Shutters device not connected"),
    )
)]
pub async fn post_command(
    State(state): State<AppState>,
    Json(body): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, HubError> {
    if !state.hub.validate_controller_token(&body.token) {
        return Err(HubError::AuthRejected);
    }
    body.validate()
        .map_err(|err| HubError::Malformed(err.to_string()))?;
    state
        .hub
        .send_shutters_command(body.action.clone(), body.channel, body.value)?;
    Ok(Json(CommandResponse {
        success: true,
        command: body.action,
    }))
}

#[utoipa::path(
    get,
    path = "/api/schedules",
    responses(
        (status = 200, description = "Schedule request sent to the device", body = ScheduleAck),
        (status = 503, description = "Shutters device not connected"),
    )
)]
pub async fn get_schedules(State(state): State<AppState>) -> Result<Json<ScheduleAck>, HubError> {
    state.hub.request_schedules()?;
    Ok(Json(ScheduleAck {
        success: true,
        requested: true,
    }))
}

#[utoipa::path(
    get,
    path = "/api/robots",
    responses((status = 200, description = "Full robot status snapshot", body = RobotsState))
)]
pub async fn get_robots(State(state): State<AppState>) -> Json<RobotsState> {
    let mut snapshot = state.hub.snapshot_robots();
    // Units the subsystem knows but that have not produced an event yet.
    for unit in state.robots.units() {
        if let Some(status) = state.robots.cached_status(&unit.id) {
            let _ = snapshot.robots.entry(unit.id).or_insert(status);
        }
    }
    Json(snapshot)
}

#[utoipa::path(
    get,
    path = "/api/robots/{id}",
    params(("id" = String, Path, description = "Robot identifier")),
    responses(
        (status = 200, body = RobotStatus),
        (status = 404, description = "Unknown robot"),
    )
)]
pub async fn get_robot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RobotStatus>, HubError> {
    state
        .hub
        .robot_status(&id)
        .or_else(|| state.robots.cached_status(&id))
        .map(Json)
        .ok_or(HubError::RobotNotFound(id))
}

#[utoipa::path(
    post,
    path = "/api/robots/{id}/command",
    params(("id" = String, Path, description = "Robot identifier")),
    request_body = RobotCommandRequest,
    responses(
        (status = 200, body = CommandResponse),
        (status = 401, description = "Invalid token"),
        (status = 404, description = "Unknown robot"),
        (status = 503, description = "Robot not connected"),
    )
)]
pub async fn post_robot_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RobotCommandRequest>,
) -> Result<Json<CommandResponse>, HubError> {
    if !state.hub.validate_controller_token(&body.token) {
        return Err(HubError::AuthRejected);
    }
    state.hub.issue_robot_command(&id, &body.command)?;
    Ok(Json(CommandResponse {
        success: true,
        command: body.command,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[utoipa::path(
    get,
    path = "/api/history/irrigation",
    params(("limit" = Option<usize>, Query, description = "Maximum records, newest first")),
    responses((status = 200, body = [HistoryRecord]))
)]
pub async fn get_irrigation_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<HistoryRecord>>, HubError> {
    let records = state
        .history
        .recent(HistoryScope::Irrigation, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(records))
}
