//! End-to-end access scenarios over the seeded hospital/lab/pharmacy setup.

use std::time::Duration;

use carevault_broker::{AttackType, GrantRequest, KeyDelivery, RetrievalError};
use carevault_core::now_secs;
use carevault_ledger::{AccessDecision, AccessType, DecisionStatus, DenialReason, ACTION_DENIED};
use carevault_testkit::{Scenario, HOSPITAL, LAB, PATIENT_RECORD, PATIENT_RESOURCE, PHARMACY};

fn forbidden(reason: &str) -> RetrievalError {
    RetrievalError::Forbidden(reason.to_string())
}

/// Wait for the audit worker to write `n` entries for the patient record.
async fn audit_entries(scenario: &Scenario, n: usize) -> Vec<carevault_ledger::AuditLogEntry> {
    for _ in 0..200 {
        let trail = scenario.broker.ledger().audit_trail(PATIENT_RESOURCE).await.unwrap();
        if trail.len() >= n {
            return trail;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("audit trail never reached {} entries", n);
}

#[tokio::test]
async fn owner_reads_own_record() {
    let scenario = Scenario::new().await.unwrap();

    let record = scenario.broker.retrieve(PATIENT_RESOURCE, HOSPITAL).await.unwrap();
    assert_eq!(&record.data[..], PATIENT_RECORD);
    assert_eq!(record.content_type, "application/fhir+json");
    assert_eq!(record.resource_id, PATIENT_RESOURCE);

    let trail = audit_entries(&scenario, 1).await;
    assert_eq!(trail[0].action, "retrieve");
    assert_eq!(trail[0].actor_org_id.as_str(), HOSPITAL);
}

#[tokio::test]
async fn granted_lab_reads_until_grant_revoked() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::Reencryption).await.unwrap();

    let record = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap();
    assert_eq!(&record.data[..], PATIENT_RECORD);

    scenario.broker.revoke_access(PATIENT_RESOURCE, LAB).await.unwrap();
    let err = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap_err();
    assert_eq!(err, forbidden("Access has been revoked"));
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn expired_grant_is_refused() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(-60, KeyDelivery::None).await.unwrap();

    let err = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap_err();
    assert_eq!(err, forbidden("Access has expired"));
}

#[tokio::test]
async fn no_grant_is_refused_and_audited_as_denied() {
    let scenario = Scenario::new().await.unwrap();

    let err = scenario.broker.retrieve(PATIENT_RESOURCE, PHARMACY).await.unwrap_err();
    assert_eq!(err, forbidden("No access grant found"));

    let trail = audit_entries(&scenario, 1).await;
    assert_eq!(trail[0].action, ACTION_DENIED);
    assert_eq!(trail[0].actor_org_id.as_str(), PHARMACY);
}

#[tokio::test]
async fn org_ids_are_case_insensitive() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::Direct).await.unwrap();

    let record = scenario.broker.retrieve(PATIENT_RESOURCE, "LAB-001").await.unwrap();
    assert_eq!(&record.data[..], PATIENT_RECORD);

    let probe = scenario.broker.probe(PATIENT_RESOURCE, " Hospital-001 ").await.unwrap();
    assert!(probe.decision.is_owner);
}

#[tokio::test]
async fn ledger_revocation_beats_grant_and_ownership() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::Reencryption).await.unwrap();

    let outcome = scenario.broker.revoke_org(LAB, Some("credential leak")).await.unwrap();
    assert!(outcome.tx_id.is_some());
    let err = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap_err();
    assert_eq!(err, forbidden("organization revoked"));

    scenario.broker.revoke_org(HOSPITAL, None).await.unwrap();
    let err = scenario.broker.retrieve(PATIENT_RESOURCE, HOSPITAL).await.unwrap_err();
    assert_eq!(err, forbidden("organization revoked"));

    scenario.broker.reinstate_org(LAB).await.unwrap();
    let record = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap();
    assert_eq!(&record.data[..], PATIENT_RECORD);
}

#[tokio::test]
async fn override_alone_denies() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::Reencryption).await.unwrap();

    scenario.broker.set_override(LAB, true, AttackType::Revoked).unwrap();
    let on_ledger = scenario.broker.ledger().query_org(LAB).await.unwrap();
    assert!(!on_ledger.is_revoked);

    let err = scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.unwrap_err();
    assert_eq!(err, forbidden("organization revoked"));
    assert!(matches!(
        scenario.broker.probe(PATIENT_RESOURCE, LAB).await,
        Err(RetrievalError::Forbidden(_))
    ));

    // A non-revocation attack type does not deny.
    scenario.broker.set_override(LAB, true, AttackType::Compromised).unwrap();
    assert!(scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.is_ok());

    scenario.broker.set_override(LAB, true, AttackType::Revoked).unwrap();
    assert_eq!(scenario.broker.clear_overrides(), 1);
    assert!(scenario.broker.override_status().is_empty());
    assert!(scenario.broker.retrieve(PATIENT_RESOURCE, LAB).await.is_ok());
}

#[tokio::test]
async fn unknown_resource_and_bad_caller() {
    let scenario = Scenario::new().await.unwrap();

    let err = scenario.broker.retrieve("patient-999", HOSPITAL).await.unwrap_err();
    assert!(matches!(err, RetrievalError::NotFound(_)));
    assert_eq!(err.status_code(), 404);

    let err = scenario.broker.retrieve(PATIENT_RESOURCE, "   ").await.unwrap_err();
    assert!(matches!(err, RetrievalError::ValidationError(_)));
}

#[tokio::test]
async fn probe_returns_metadata_and_decision() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::None).await.unwrap();

    let probe = scenario.broker.probe(PATIENT_RESOURCE, LAB).await.unwrap();
    assert!(probe.decision.has_access);
    assert!(!probe.decision.is_owner);
    assert_eq!(probe.resource.content_id, scenario.content_id());
}

#[tokio::test]
async fn check_access_returns_override_decision() {
    let scenario = Scenario::new().await.unwrap();
    scenario.grant_lab(3600, KeyDelivery::Reencryption).await.unwrap();

    let granted = scenario.broker.check_access(PATIENT_RESOURCE, LAB).await.unwrap();
    assert!(granted.has_access);
    assert!(!granted.is_owner);
    assert_eq!(granted.access_type, Some(AccessType::Read));

    let no_grant = scenario.broker.check_access(PATIENT_RESOURCE, PHARMACY).await.unwrap();
    assert_eq!(no_grant, AccessDecision::denied(DenialReason::NoGrant));
    assert_eq!(no_grant.status, None);

    // The ledger still says the lab is in good standing.
    scenario.broker.set_override(LAB, true, AttackType::Revoked).unwrap();
    let denied = scenario.broker.check_access(PATIENT_RESOURCE, LAB).await.unwrap();
    assert!(!denied.has_access);
    assert!(!denied.is_owner);
    assert_eq!(denied.access_type, None);
    assert_eq!(denied.status, Some(DecisionStatus::Denied));
    assert_eq!(denied.reason, Some(DenialReason::OrganizationRevoked));

    // Ownership does not survive an override either.
    assert!(scenario.broker.check_access(PATIENT_RESOURCE, HOSPITAL).await.unwrap().is_owner);
    scenario.broker.set_override(HOSPITAL, true, AttackType::Revoked).unwrap();
    let owner = scenario.broker.check_access(PATIENT_RESOURCE, HOSPITAL).await.unwrap();
    assert_eq!(owner, AccessDecision::denied(DenialReason::OrganizationRevoked));

    let err = scenario.broker.check_access("", LAB).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn padded_ids_share_key_material_with_canonical_ids() {
    let scenario = Scenario::new().await.unwrap();
    let padded = format!("  {}\t", PATIENT_RESOURCE);

    let record = scenario.broker.retrieve(&padded, HOSPITAL).await.unwrap();
    assert_eq!(&record.data[..], PATIENT_RECORD);
    assert_eq!(record.resource_id, PATIENT_RESOURCE);

    let receipt = scenario
        .broker
        .grant_access(GrantRequest {
            resource_id: padded.clone(),
            grantee_org_id: format!(" {} ", LAB.to_uppercase()),
            access_type: "read".into(),
            expiry_timestamp: now_secs() + 3600,
            key_delivery: KeyDelivery::Reencryption,
        })
        .await
        .unwrap();
    assert_eq!(receipt.grant.resource_id.as_str(), PATIENT_RESOURCE);
    assert!(receipt.delegation.is_some());

    scenario
        .broker
        .grant_access(GrantRequest {
            resource_id: padded.clone(),
            grantee_org_id: PHARMACY.into(),
            access_type: "read".into(),
            expiry_timestamp: now_secs() + 3600,
            key_delivery: KeyDelivery::Direct,
        })
        .await
        .unwrap();

    for org in [LAB, PHARMACY] {
        let canonical = scenario.broker.retrieve(PATIENT_RESOURCE, org).await.unwrap();
        assert_eq!(&canonical.data[..], PATIENT_RECORD);
        let padded_read = scenario.broker.retrieve(&padded, org).await.unwrap();
        assert_eq!(&padded_read.data[..], PATIENT_RECORD);
    }

    let key = scenario.broker.resolve_key(&padded, LAB).await.unwrap();
    let same = scenario.broker.resolve_key(PATIENT_RESOURCE, LAB).await.unwrap();
    assert_eq!(key.as_bytes(), same.as_bytes());
}
