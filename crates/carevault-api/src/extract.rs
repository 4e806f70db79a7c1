//! Request extractors that reject with [`ApiError`].

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::request::Parts,
    Json,
};

use crate::error::ApiError;

/// Header naming the calling organization.
pub const ORG_HEADER: &str = "x-org-id";

/// JSON body. Malformed bodies and missing fields are a 400.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(ApiJson(value))
    }
}

/// The caller's organization id from `x-org-id`, trimmed and non-empty.
/// Case is left to the broker.
#[derive(Debug, Clone)]
pub struct CallerOrg(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerOrg
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(ORG_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::BadRequest(format!("missing {} header", ORG_HEADER)))?;
        Ok(CallerOrg(value.to_string()))
    }
}
