//! Attack override endpoints

use axum::{extract::State, Json};

use carevault_broker::{AttackType, OverrideStatus};

use crate::dto::{ClearOverridesResponse, OverrideListResponse, OverrideRequest};
use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::AppState;

/// Set or clear the override flag for one organization
pub async fn set_override(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<OverrideRequest>,
) -> ApiResult<Json<OverrideStatus>> {
    let attack_type: AttackType = req.attack_type.parse()?;
    let status = state.broker.set_override(&req.org_id, req.active, attack_type)?;
    Ok(Json(status))
}

/// Drop every override flag
pub async fn clear_overrides(State(state): State<AppState>) -> Json<ClearOverridesResponse> {
    Json(ClearOverridesResponse {
        cleared: state.broker.clear_overrides(),
    })
}

pub async fn override_status(State(state): State<AppState>) -> Json<OverrideListResponse> {
    Json(OverrideListResponse {
        overrides: state.broker.override_status(),
    })
}
