// error.rs
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::models::DeviceClass;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("authentication rejected")]
    AuthRejected,
    #[error("{0} device not connected")]
    NotConnected(DeviceClass),
    #[error("unknown robot: {0}")]
    RobotNotFound(String),
    #[error("failed to send to peer")]
    SendFailed,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::AuthRejected => StatusCode::UNAUTHORIZED,
            Self::NotConnected(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RobotNotFound(_) => StatusCode::NOT_FOUND,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::SendFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
