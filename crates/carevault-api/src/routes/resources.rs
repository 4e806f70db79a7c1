//! Resource endpoints

use axum::{
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use tracing::debug;

use carevault_broker::{DecryptedResource, ResourceProbe, UploadReceipt, UploadRequest};

use crate::dto::UploadResourceRequest;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, CallerOrg};
use crate::state::AppState;

const RESOURCE_ID_HEADER: HeaderName = HeaderName::from_static("x-resource-id");
const RESOURCE_TYPE_HEADER: HeaderName = HeaderName::from_static("x-resource-type");
const ELAPSED_HEADER: HeaderName = HeaderName::from_static("x-elapsed-ms");

/// Retrieve and decrypt a resource for the calling organization
pub async fn get_resource(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    CallerOrg(caller): CallerOrg,
) -> ApiResult<Response> {
    let record = state.broker.retrieve(&resource_id, &caller).await?;
    debug!(%resource_id, %caller, elapsed_ms = record.elapsed_ms, "resource served");
    record_response(record)
}

fn record_response(record: DecryptedResource) -> ApiResult<Response> {
    let header_value = |value: &str| {
        HeaderValue::from_str(value)
            .map_err(|_| ApiError::InternalError("unrepresentable header value".to_string()))
    };
    let resource_id = header_value(&record.resource_id)?;
    let resource_type = header_value(&record.resource_type)?;

    let mut response = record.data.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(record.content_type));
    headers.insert(RESOURCE_ID_HEADER, resource_id);
    headers.insert(RESOURCE_TYPE_HEADER, resource_type);
    headers.insert(ELAPSED_HEADER, HeaderValue::from(record.elapsed_ms));
    Ok(response)
}

/// Metadata and the caller's access decision
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    CallerOrg(caller): CallerOrg,
) -> ApiResult<Json<ResourceProbe>> {
    Ok(Json(state.broker.probe(&resource_id, &caller).await?))
}

/// Encrypt and store a new resource
pub async fn upload_resource(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UploadResourceRequest>,
) -> ApiResult<Json<UploadReceipt>> {
    let data = STANDARD
        .decode(req.data.trim())
        .map_err(|e| ApiError::BadRequest(format!("data is not valid base64: {}", e)))?;

    let receipt = state
        .broker
        .upload(UploadRequest {
            resource_id: req.resource_id,
            owner_org_id: req.owner_org_id,
            resource_type: req.resource_type,
            data: Bytes::from(data),
        })
        .await?;

    Ok(Json(receipt))
}
