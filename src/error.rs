use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Workflow error taxonomy. Every operation fails fast on the first
/// violated precondition; handlers propagate with `?` and the
/// `ResponseError` impl turns the variant into a JSON error body.
#[derive(Debug, Error)]
pub enum AppError {
    /// Referenced entity does not exist. The message names the resource
    /// kind only, never whether it exists but is inaccessible.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Input fails a precondition: wrong status for the operation,
    /// malformed field, invalid role reference.
    #[error("{0}")]
    Validation(String),

    /// A uniqueness invariant would be violated.
    #[error("{0}")]
    Conflict(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let Self::Database(err) = self {
            log::error!("Database error: {err}");
        }
        let message = match self {
            Self::Database(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }))
    }
}

/// Maps a storage-level unique violation onto the conflict the caller
/// actually cares about, leaving other errors untouched.
pub fn unique_violation(err: sqlx::Error, conflict: &str) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::conflict(conflict.to_string())
        }
        _ => AppError::Database(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            AppError::NotFound("Appointment").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::conflict("dup").status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn not_found_message_names_resource_only() {
        assert_eq!(
            AppError::NotFound("Rating token").to_string(),
            "Rating token not found"
        );
    }
}
