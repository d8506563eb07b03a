use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::models::attempt::AttemptStatus;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Quiz {0} is not published")]
    NotPublished(i64),

    #[error("Attempt does not belong to the caller")]
    NotOwner,

    #[error("Quiz is outside its availability window: {0}")]
    OutsideWindow(String),

    #[error("Maximum attempts reached ({max})")]
    MaxAttemptsReached { max: i32 },

    #[error("Attempt is no longer in progress (status {status})")]
    AlreadySubmitted { status: AttemptStatus },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Time limit of {limit_minutes} minutes exceeded")]
    TimeExceeded { limit_minutes: i32 },

    #[error("Question {question_id} does not belong to quiz {quiz_id}")]
    QuestionMismatch { question_id: i64, quiz_id: i64 },

    #[error("Malformed answer: {0}")]
    MalformedAnswer(String),

    #[error("Points {requested} exceed the question maximum of {maximum}")]
    PointsExceedMaximum { requested: Decimal, maximum: Decimal },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bulk grading rejected for {} answer(s)", failures.len())]
    BulkGrade {
        failures: Vec<GradeFailure>,
        applied: Vec<Uuid>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// One rejected entry of a bulk grading request.
#[derive(Debug, Clone, Serialize)]
pub struct GradeFailure {
    pub answer_id: Uuid,
    pub kind: ErrorKind,
    pub reason: String,
}

impl GradeFailure {
    pub fn from_error(answer_id: Uuid, err: &Error) -> Self {
        Self {
            answer_id,
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    OutOfWindow,
    LimitReached,
    TimeExceeded,
    ValidationError,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::OutOfWindow => "out_of_window",
            ErrorKind::LimitReached => "limit_reached",
            ErrorKind::TimeExceeded => "time_exceeded",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Internal => "internal",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidState => StatusCode::CONFLICT,
            ErrorKind::OutOfWindow => StatusCode::FORBIDDEN,
            ErrorKind::LimitReached => StatusCode::CONFLICT,
            ErrorKind::TimeExceeded => StatusCode::FORBIDDEN,
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Forbidden(_) | Error::NotPublished(_) | Error::NotOwner => ErrorKind::Forbidden,
            Error::OutsideWindow(_) => ErrorKind::OutOfWindow,
            Error::MaxAttemptsReached { .. } => ErrorKind::LimitReached,
            Error::AlreadySubmitted { .. } | Error::InvalidState(_) | Error::Conflict(_) => {
                ErrorKind::InvalidState
            }
            Error::TimeExceeded { .. } => ErrorKind::TimeExceeded,
            Error::BadRequest(_)
            | Error::QuestionMismatch { .. }
            | Error::MalformedAnswer(_)
            | Error::PointsExceedMaximum { .. }
            | Error::Validation(_)
            | Error::Json(_) => ErrorKind::ValidationError,
            Error::BulkGrade { failures, .. } => failures
                .first()
                .map(|f| f.kind)
                .unwrap_or(ErrorKind::ValidationError),
            Error::Config(_) | Error::Database(_) | Error::Anyhow(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let kind = self.kind();
        let body = match &self {
            Error::BulkGrade { failures, applied } => json!({
                "error": kind.code(),
                "message": self.to_string(),
                "failures": failures,
                "applied": applied,
            }),
            Error::Database(err) => {
                tracing::error!(error = ?err, "Database error");
                json!({ "error": kind.code(), "message": "An unexpected error occurred" })
            }
            Error::Config(_) | Error::Anyhow(_) | Error::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                json!({ "error": kind.code(), "message": "An unexpected error occurred" })
            }
            _ => json!({ "error": kind.code(), "message": self.to_string() }),
        };
        (kind.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("Resource not found".to_string()),
            other => Error::Database(other),
        }
    }
}
