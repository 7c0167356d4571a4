use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gitpulse_core::HarvestError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

/// HTTP boundary error. Everything below the handlers speaks
/// [`HarvestError`]; this maps it to a status code and a JSON body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<HarvestError> for AppError {
    fn from(err: HarvestError) -> Self {
        match err {
            HarvestError::Model(inner) => Self::bad_request(inner.to_string()),
            HarvestError::IntentNotFound(id) => Self::not_found(format!("intent {id} not found")),
            HarvestError::RepositoryNotFound(name) => {
                Self::not_found(format!("repository {name} not found"))
            }
            other => {
                // Details stay in the logs; clients get a generic 500.
                tracing::error!(err = %other, "request failed");
                Self::internal("internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitpulse_model::ModelError;
    use uuid::Uuid;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = AppError::from(HarvestError::Model(ModelError::InvalidStartDate));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_resources_map_to_not_found() {
        let err = AppError::from(HarvestError::IntentNotFound(Uuid::nil()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = AppError::from(HarvestError::RepositoryNotFound("a/b".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn everything_else_maps_to_internal_and_hides_details() {
        let err = AppError::from(HarvestError::Internal("pool exhausted".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "internal server error");
    }
}
