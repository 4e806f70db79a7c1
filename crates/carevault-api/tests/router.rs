//! Router tests over a seeded in-memory broker.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use carevault_api::{create_app, AppState};
use carevault_core::now_secs;
use carevault_testkit::{Scenario, HOSPITAL, LAB, PATIENT_RECORD, PATIENT_RESOURCE, PHARMACY};

async fn app() -> (Router, Scenario) {
    let scenario = Scenario::new().await.unwrap();
    let app = create_app(AppState::new(scenario.broker.clone()));
    (app, scenario)
}

fn get(uri: &str, org: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(org) = org {
        builder = builder.header("x-org-id", org);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, _, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn grant_body(expiry: i64) -> Value {
    json!({
        "resourceId": PATIENT_RESOURCE,
        "granteeOrgId": LAB,
        "accessType": "read",
        "expiryTimestamp": expiry,
    })
}

#[tokio::test]
async fn test_health() {
    let (app, _scenario) = app().await;
    let (status, body) = send_json(&app, get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["overrides"], 0);
}

#[tokio::test]
async fn test_owner_retrieves_with_headers() {
    let (app, _scenario) = app().await;
    let uri = format!("/resources/{}", PATIENT_RESOURCE);
    let (status, headers, body) = send(&app, get(&uri, Some(HOSPITAL))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, PATIENT_RECORD);
    assert_eq!(headers["content-type"], "application/fhir+json");
    assert_eq!(headers["x-resource-id"], PATIENT_RESOURCE);
    assert_eq!(headers["x-resource-type"], "fhir-json");
    assert!(headers.contains_key("x-elapsed-ms"));
}

#[tokio::test]
async fn test_missing_org_header_is_bad_request() {
    let (app, _scenario) = app().await;
    let uri = format!("/resources/{}", PATIENT_RESOURCE);

    let (status, body) = send_json(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, _) = send_json(&app, get(&uri, Some("  "))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_denial_reason_in_body() {
    let (app, _scenario) = app().await;
    let uri = format!("/resources/{}", PATIENT_RESOURCE);

    let (status, body) = send_json(&app, get(&uri, Some(PHARMACY))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "No access grant found");
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let (app, _scenario) = app().await;
    let (status, body) = send_json(&app, get("/resources/patient-999", Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_storage_outage_is_service_unavailable() {
    let (app, scenario) = app().await;
    scenario.backends.primary.set_available(false);
    scenario.backends.fallback.set_available(false);

    let uri = format!("/resources/{}", PATIENT_RESOURCE);
    let (status, body) = send_json(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "STORAGE_UNAVAILABLE");
}

#[tokio::test]
async fn test_grant_then_lab_reads() {
    let (app, _scenario) = app().await;

    let (status, body) = send_json(&app, post("/access/grant", grant_body(now_secs() + 3600))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["grant"]["granteeOrgId"], LAB);
    assert!(body["txId"].is_string());
    assert!(body["delegation"]["rekeyId"].is_string());

    let uri = format!("/resources/{}", PATIENT_RESOURCE);
    let (status, _, data) = send(&app, get(&uri, Some("LAB-001"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data, PATIENT_RECORD);

    let (status, _) = send_json(
        &app,
        post("/access/revoke", json!({"resourceId": PATIENT_RESOURCE, "granteeOrgId": LAB})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, get(&uri, Some(LAB))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Access has been revoked");
}

#[tokio::test]
async fn test_grant_validation() {
    let (app, _scenario) = app().await;

    let (status, _) = send_json(
        &app,
        post("/access/grant", json!({"resourceId": PATIENT_RESOURCE, "granteeOrgId": LAB})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = grant_body(now_secs() + 3600);
    body["accessType"] = json!("owner");
    let (status, _) = send_json(&app, post("/access/grant", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut body = grant_body(now_secs() + 3600);
    body["keyDelivery"] = json!("carrier-pigeon");
    let (status, body) = send_json(&app, post("/access/grant", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_metadata_probe() {
    let (app, scenario) = app().await;
    let uri = format!("/resources/{}/metadata", PATIENT_RESOURCE);

    let (status, body) = send_json(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"]["hasAccess"], true);
    assert_eq!(body["decision"]["isOwner"], true);
    assert_eq!(body["resource"]["contentId"], scenario.content_id());

    let (status, _) = send_json(&app, get(&uri, Some(PHARMACY))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_check_access_reports_denials() {
    let (app, _scenario) = app().await;
    let uri = format!("/access/check/{}", PATIENT_RESOURCE);

    let (status, body) = send_json(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isOwner"], true);

    let (status, _) = send_json(
        &app,
        post("/attack/override", json!({"orgId": HOSPITAL, "active": true, "attackType": "revoked"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send_json(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "hasAccess": false,
            "isOwner": false,
            "status": "DENIED",
            "reason": "organization revoked",
        })
    );

    let (status, _) = send_json(&app, get("/access/check/ghost-001", Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send_json(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_org_revoke_and_reinstate() {
    let (app, _scenario) = app().await;
    let uri = format!("/resources/{}", PATIENT_RESOURCE);

    let (status, body) = send_json(&app, post("/orgs/revoke", json!({"orgId": "Hospital-001"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orgId"], HOSPITAL);
    assert!(body["txId"].is_string());
    assert!(body["timestamp"].is_i64());

    let (status, body) = send_json(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "organization revoked");

    let (status, _) = send_json(&app, post("/orgs/reinstate", json!({"orgId": HOSPITAL}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(&app, post("/orgs/revoke", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attack_override_lifecycle() {
    let (app, _scenario) = app().await;
    let uri = format!("/resources/{}", PATIENT_RESOURCE);

    let (status, body) = send_json(
        &app,
        post("/attack/override", json!({"orgId": HOSPITAL, "active": true, "attackType": "revoked"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orgId"], HOSPITAL);
    assert_eq!(body["active"], true);
    assert_eq!(body["attackType"], "revoked");

    let (status, _, _) = send(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send_json(&app, get("/attack/status", None)).await;
    assert_eq!(body["overrides"].as_array().unwrap().len(), 1);

    let (status, body) = send_json(&app, post("/attack/clear", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cleared"], 1);

    let (status, _, _) = send(&app, get(&uri, Some(HOSPITAL))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_attack_override_validation() {
    let (app, _scenario) = app().await;

    let (status, _) = send_json(
        &app,
        post("/attack/override", json!({"orgId": HOSPITAL, "attackType": "meteor"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(&app, post("/attack/override", json!({"attackType": "revoked"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send_json(
        &app,
        post("/attack/override", json!({"orgId": "", "attackType": "revoked"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_and_register() {
    let (app, _scenario) = app().await;

    let (status, body) = send_json(
        &app,
        post("/orgs", json!({"orgId": "clinic-002", "metadata": {"name": "Clinic"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["orgId"], "clinic-002");

    let (status, body) = send_json(&app, post("/orgs", json!({"orgId": "clinic-002"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    // base64 of "lab result"
    let upload = json!({
        "resourceId": "report-7",
        "ownerOrgId": "clinic-002",
        "resourceType": "lab-report-pdf",
        "data": "bGFiIHJlc3VsdA==",
    });
    let (status, body) = send_json(&app, post("/resources", upload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resource"]["ownerOrgId"], "clinic-002");

    let (status, headers, data) = send(&app, get("/resources/report-7", Some("clinic-002"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data, b"lab result");
    assert_eq!(headers["content-type"], "application/pdf");

    let bad = json!({
        "resourceId": "report-8",
        "ownerOrgId": "clinic-002",
        "resourceType": "lab-report-pdf",
        "data": "not base64!",
    });
    let (status, _) = send_json(&app, post("/resources", bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
