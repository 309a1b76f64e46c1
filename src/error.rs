use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ApiError {
    /// The paste is unknown, expired or out of views. These are never told
    /// apart to the caller.
    #[error("paste not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    /// The request body could not be read, e.g. it is over the size limit.
    #[error("{message}")]
    Body { status: StatusCode, message: String },
    #[error("paste id already exists")]
    Conflict,
    #[error("database error")]
    Database { source: sqlx::Error },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Body { status, .. } => *status,
            ApiError::Conflict => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand back to a client. Internal failures collapse into
    /// a generic message.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Conflict | ApiError::Database { .. } => "internal server error".to_owned(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Conflict => error!("paste id collision"),
            ApiError::Database { source } => error!(error = %source, "database error"),
            _ => {}
        }
        let status_code = self.status_code();
        let body = ErrorBody {
            error: self.public_message(),
        };
        (status_code, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(source: sqlx::Error) -> Self {
        match source {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(ref db_error)
                if is_unique_violation(db_error.code().as_deref()) =>
            {
                ApiError::Conflict
            }
            _ => ApiError::Database { source },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::BytesRejection(_) => ApiError::Body {
                status: rejection.status(),
                message: rejection.body_text(),
            },
            _ => ApiError::Validation(format!("invalid request body: {}", rejection.body_text())),
        }
    }
}

// 2067/1555 are SQLite's UNIQUE and PRIMARY KEY constraint codes, 23505 is
// PostgreSQL's unique_violation.
fn is_unique_violation(code: Option<&str>) -> bool {
    matches!(code, Some("2067" | "1555" | "23505"))
}
