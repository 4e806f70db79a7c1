//! API route handlers

pub mod access;
pub mod attack;
pub mod health;
pub mod orgs;
pub mod resources;

use axum::{routing::get, routing::post, Router};

use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health_check))
        // Resource endpoints
        .route("/resources", post(resources::upload_resource))
        .route("/resources/:resource_id", get(resources::get_resource))
        .route("/resources/:resource_id/metadata", get(resources::get_metadata))
        // Access endpoints
        .route("/access/grant", post(access::grant_access))
        .route("/access/revoke", post(access::revoke_access))
        .route("/access/check/:resource_id", get(access::check_access))
        // Organization endpoints
        .route("/orgs", post(orgs::register_org))
        .route("/orgs/revoke", post(orgs::revoke_org))
        .route("/orgs/reinstate", post(orgs::reinstate_org))
        // Override endpoints
        .route("/attack/override", post(attack::set_override))
        .route("/attack/clear", post(attack::clear_overrides))
        .route("/attack/status", get(attack::override_status))
        // State
        .with_state(state)
}
