use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("No GPIO chip found: {0}")]
    NoChipFound(String),
    #[error("Invalid GPIO chip {path}: {reason}")]
    InvalidChip { path: String, reason: String },
    #[error("Invalid line config: {0}")]
    InvalidLineConfig(String),
    #[error("Failed to acquire lines on {chip}: {reason}")]
    AcquireFailed { chip: String, reason: String },
    #[error("No active line request")]
    NotBound,
    #[error("Line {0} was never requested")]
    UnknownLine(u32),
    #[error("Line {0} is not configured as output")]
    WrongDirection(u32),
    #[error("Line {0} is already in use by another consumer")]
    LineInUse(u32),
    #[error("Entity not found: {0}")]
    NotFoundEntity(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFoundEntity(_) | AppError::UnknownLine(_) => StatusCode::NOT_FOUND,
            AppError::InvalidValue(_)
            | AppError::InvalidLineConfig(_)
            | AppError::WrongDirection(_) => StatusCode::BAD_REQUEST,
            AppError::LineInUse(_) => StatusCode::CONFLICT,
            AppError::NotBound => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NoChipFound(_)
            | AppError::InvalidChip { .. }
            | AppError::AcquireFailed { .. }
            | AppError::Config(_)
            | AppError::Gpio(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
