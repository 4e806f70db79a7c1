//! Organization endpoints

use axum::{extract::State, Json};

use carevault_broker::{RevocationOutcome, TxReceipt};
use carevault_ledger::Organization;

use crate::dto::{OrgRequest, RegisterOrgRequest};
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::AppState;

/// Register an organization
pub async fn register_org(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterOrgRequest>,
) -> ApiResult<Json<TxReceipt<Organization>>> {
    Ok(Json(state.broker.register_org(&req.org_id, req.metadata).await?))
}

/// Revoke an organization locally and on the ledger.
///
/// Succeeds once the local revocation is in place; a ledger failure is
/// reported in `ledgerError` with a null `txId`.
pub async fn revoke_org(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OrgRequest>,
) -> ApiResult<Json<RevocationOutcome>> {
    Ok(Json(
        state
            .broker
            .revoke_org(&req.org_id, req.reason.as_deref())
            .await?,
    ))
}

pub async fn reinstate_org(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OrgRequest>,
) -> ApiResult<Json<RevocationOutcome>> {
    Ok(Json(state.broker.reinstate_org(&req.org_id).await?))
}
