use axum::{http::StatusCode, response::IntoResponse};

use crate::data_formats::{ApiResponse, ErrorBody};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    NotAuthorized(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),
    #[error("request timed out")]
    Timeout,
    #[error("internal error: {0}")]
    ServerError(String),
    #[error("database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl RequestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::NotAuthorized(_) => StatusCode::UNAUTHORIZED,
            RequestError::Forbidden(_) => StatusCode::FORBIDDEN,
            RequestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RequestError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RequestError::ServerError(_) | RequestError::DatabaseError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            RequestError::NotFound(message)
            | RequestError::NotAuthorized(message)
            | RequestError::Forbidden(message) => ErrorBody::Message(message.to_string()),
            RequestError::Validation(messages) => ErrorBody::List(messages.clone()),
            RequestError::Timeout => ErrorBody::Message("Request timed out".to_string()),
            RequestError::ServerError(message) => {
                tracing::error!("Internal error: {}", message);
                ErrorBody::Message("Internal Server Error".to_string())
            }
            RequestError::DatabaseError(e) => {
                tracing::error!("Database error: {}", e);
                ErrorBody::Message("Internal Server Error".to_string())
            }
        }
    }

    /// Unique-constraint violations surface as validation messages rather than 500s.
    pub fn is_unique_violation(error: &sqlx::Error) -> bool {
        match error {
            sqlx::Error::Database(e) => e.message().contains("UNIQUE constraint failed"),
            _ => false,
        }
    }
}

impl From<anyhow::Error> for RequestError {
    fn from(value: anyhow::Error) -> Self {
        Self::ServerError(format!("{value:#}"))
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> axum::response::Response {
        ApiResponse::<()>::failure(self.status_code(), self.body()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_status(err: RequestError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn not_found_returns_404() {
        assert_eq!(
            response_status(RequestError::NotFound("article not found")),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn forbidden_returns_403() {
        assert_eq!(
            response_status(RequestError::Forbidden("nope")),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn validation_returns_422_with_every_message() {
        let err = RequestError::Validation(vec!["title is required".into(), "bad image".into()]);
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        match err.body() {
            ErrorBody::List(messages) => assert_eq!(messages.len(), 2),
            ErrorBody::Message(_) => panic!("expected a message list"),
        }
    }

    #[test]
    fn database_error_hides_details() {
        let err = RequestError::DatabaseError(sqlx::Error::RowNotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        match err.body() {
            ErrorBody::Message(message) => assert_eq!(message, "Internal Server Error"),
            ErrorBody::List(_) => panic!("expected a single message"),
        }
    }
}
