use utoipa::OpenApi;

use crate::history;
use crate::http;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "casa-relay",
        description = "Relay hub for shutters, irrigation and cleaning robots"
    ),
    paths(
        http::health,
        http::get_state,
        http::post_command,
        http::get_schedules,
        http::get_robots,
        http::get_robot,
        http::post_robot_command,
        http::get_irrigation_history,
    ),
    components(
        schemas(
            models::ShutterChannel,
            models::ShuttersState,
            models::IrrigationState,
            models::RobotStatus,
            models::RobotsState,
            history::HistoryRecord,
            history::HistoryScope,
            http::HealthResponse,
            http::CommandRequest,
            http::CommandResponse,
            http::RobotCommandRequest,
            http::ScheduleAck,
        )
    )
)]
pub struct ApiDoc;
