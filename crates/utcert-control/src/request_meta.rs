use axum::{
    Json, async_trait,
    extract::{FromRequest, Request},
};
use serde::de::DeserializeOwned;

use crate::error::{ApiError, ServiceError};

/// Per-request context attached by `security::request_id`.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    /// Peer address, or the first `X-Forwarded-For` hop behind a trusted proxy.
    pub ip: String,
}

impl RequestMeta {
    pub fn fail(&self, error: ServiceError) -> ApiError {
        ApiError {
            error,
            request_id: self.request_id.clone(),
        }
    }
}

/// JSON body extractor whose rejections use the failure envelope.
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let request_id = req
            .extensions()
            .get::<RequestMeta>()
            .map(|m| m.request_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError {
                error: ServiceError::Validation(rejection.body_text()),
                request_id,
            }),
        }
    }
}
