use axum::{
    http::StatusCode,
    response::{
        IntoResponse,
        Response,
    },
};
use edupulse_scheduler::TriggerError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("a rollup covering these families is already pending or processing")]
    Conflict,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TriggerError> for AppError {
    fn from(error: TriggerError) -> Self {
        match error {
            TriggerError::Conflict => AppError::Conflict,
            TriggerError::Configuration(message) => AppError::BadRequest(message),
            TriggerError::Store(error) => AppError::Internal(error.to_string()),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status(),
            axum::Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
