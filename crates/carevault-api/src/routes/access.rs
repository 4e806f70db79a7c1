//! Access grant endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use carevault_broker::{GrantReceipt, GrantRequest, KeyDelivery, TxReceipt};
use carevault_ledger::{AccessDecision, AccessGrant};

use crate::dto::{GrantAccessRequest, RevokeAccessRequest};
use crate::error::ApiResult;
use crate::extract::{ApiJson, CallerOrg};
use crate::state::AppState;

/// Grant access and deliver the content key
pub async fn grant_access(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<GrantAccessRequest>,
) -> ApiResult<Json<GrantReceipt>> {
    let key_delivery = match req.key_delivery.as_deref() {
        Some(raw) => raw.parse::<KeyDelivery>()?,
        None => KeyDelivery::default(),
    };

    let receipt = state
        .broker
        .grant_access(GrantRequest {
            resource_id: req.resource_id,
            grantee_org_id: req.grantee_org_id,
            access_type: req.access_type,
            expiry_timestamp: req.expiry_timestamp,
            key_delivery,
        })
        .await?;

    Ok(Json(receipt))
}

/// Revoke a grant
pub async fn revoke_access(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RevokeAccessRequest>,
) -> ApiResult<Json<TxReceipt<AccessGrant>>> {
    Ok(Json(
        state
            .broker
            .revoke_access(&req.resource_id, &req.grantee_org_id)
            .await?,
    ))
}

/// The caller's access decision, denials included
pub async fn check_access(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    CallerOrg(caller): CallerOrg,
) -> ApiResult<Json<AccessDecision>> {
    Ok(Json(state.broker.check_access(&resource_id, &caller).await?))
}
