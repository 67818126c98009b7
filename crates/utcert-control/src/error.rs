use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Failures raised by the service layer.
///
/// Every variant except `Database` and `Internal` carries a message that is
/// safe to show to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    ExternalService(String),
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("db error: {0}")]
    Database(#[from] sea_orm::DbErr),
    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::Validation(_) => "validation_failed",
            ServiceError::ExternalService(_) => "external_service_failed",
            ServiceError::Auth(_) => "unauthorized",
            ServiceError::AlreadyExists(_) => "already_exists",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Database(_) => "db_error",
            ServiceError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidState(_) | ServiceError::AlreadyExists(_) => StatusCode::CONFLICT,
            ServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Auth(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn is_internal(&self) -> bool {
        matches!(self, ServiceError::Database(_) | ServiceError::Internal(_))
    }

    fn public_message(&self) -> String {
        if self.is_internal() {
            "internal error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Success envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }
}

#[derive(Debug, Serialize)]
struct FailureBody {
    success: bool,
    message: String,
    code: &'static str,
    request_id: String,
}

/// A service failure bound to the request it happened in.
#[derive(Debug)]
pub struct ApiError {
    pub error: ServiceError,
    pub request_id: String,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if self.error.is_internal() {
            tracing::error!(request_id = %self.request_id, err = %self.error, "request failed");
        } else {
            tracing::debug!(request_id = %self.request_id, code = self.error.code(), err = %self.error, "request rejected");
        }

        let body = FailureBody {
            success: false,
            message: self.error.public_message(),
            code: self.error.code(),
            request_id: self.request_id,
        };
        (status, Json(body)).into_response()
    }
}
