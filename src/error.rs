//! Domain error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::cache::CacheError;
use crate::db::StoreError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid identifier for `{field}`: {value}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("{0}")]
    Validation(String),

    #[error("grade must be between 0 and 100, got {0}")]
    InvalidGrade(i64),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("no enrollment for student {student_id} in course {course_id}")]
    EnrollmentNotFound {
        student_id: String,
        course_id: String,
    },

    #[error("student {student_id} is already enrolled in course {course_id}")]
    AlreadyEnrolled {
        student_id: String,
        course_id: String,
    },

    #[error("{0}")]
    Conflict(String),

    #[error("time limit of {limit_minutes} minutes exceeded for quiz {quiz_id}")]
    TimeLimitExceeded { quiz_id: String, limit_minutes: u32 },

    #[error("{0}")]
    Unauthorized(String),

    #[error("insufficient role for this operation")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier { .. } => "InvalidIdentifier",
            Self::Validation(_) => "ValidationError",
            Self::InvalidGrade(_) => "InvalidGrade",
            Self::NotFound { .. } => "NotFound",
            Self::EnrollmentNotFound { .. } => "EnrollmentNotFound",
            Self::AlreadyEnrolled { .. } => "AlreadyEnrolled",
            Self::Conflict(_) => "Conflict",
            Self::TimeLimitExceeded { .. } => "TimeLimitExceeded",
            Self::Unauthorized(_) => "Unauthorized",
            Self::Forbidden => "Forbidden",
            Self::Store(_) => "StoreError",
            Self::Cache(_) => "CacheError",
            Self::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier { .. } | Self::Validation(_) | Self::InvalidGrade(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound { .. } | Self::EnrollmentNotFound { .. } => StatusCode::NOT_FOUND,
            Self::AlreadyEnrolled { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::TimeLimitExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Store(_) | Self::Cache(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
        }
        let body = json!({ "error": self.kind(), "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_families_map_to_distinct_statuses() {
        assert_eq!(AppError::InvalidGrade(101).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::not_found("course", "c1").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::AlreadyEnrolled {
                student_id: "s".into(),
                course_id: "c".into()
            }
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Store(StoreError::Unavailable("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
