//! Proptest generators for property-based testing.

use proptest::prelude::*;

use carevault_broker::AttackType;
use carevault_ledger::{AccessGrant, AccessType};

/// A lowercase organization id.
pub fn org_id() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(String::from)
}

/// `id` with each letter's case flipped at random.
pub fn case_variant(id: String) -> impl Strategy<Value = String> {
    let len = id.len();
    prop::collection::vec(any::<bool>(), len).prop_map(move |flips| {
        id.chars()
            .zip(flips)
            .map(|(c, upper)| if upper { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

/// A resource id. Case is significant.
pub fn resource_id() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9-]{0,23}".prop_map(String::from)
}

/// A grantable access type.
pub fn access_type() -> impl Strategy<Value = AccessType> {
    prop_oneof![
        Just(AccessType::Read),
        Just(AccessType::Write),
        Just(AccessType::Admin),
    ]
}

/// An access type as a caller might spell it.
pub fn access_type_spelling() -> impl Strategy<Value = String> {
    access_type().prop_flat_map(|t| case_variant(t.as_str().to_string()))
}

pub fn attack_type() -> impl Strategy<Value = AttackType> {
    prop_oneof![
        Just(AttackType::Revoked),
        Just(AttackType::Compromised),
        Just(AttackType::Expired),
        Just(AttackType::Unauthorized),
    ]
}

/// A resource type tag.
pub fn resource_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("fhir-json".to_string()),
        Just("lab-report-pdf".to_string()),
        Just("dicom".to_string()),
        Just("clinical-note".to_string()),
        "[a-z]{1,12}".prop_map(String::from),
    ]
}

/// Record bytes up to `max_len`.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// A plausible epoch-seconds timestamp.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_000_000_000i64..=4_000_000_000i64
}

/// A grant on `resource_id` for `grantee`, in any state.
pub fn grant(resource_id: &str, grantee: &str) -> impl Strategy<Value = AccessGrant> {
    let resource_id = resource_id.to_string();
    let grantee = grantee.to_string();
    (access_type(), timestamp(), any::<bool>(), timestamp()).prop_filter_map(
        "ids must parse",
        move |(access_type, expiry, is_active, granted_at)| {
            Some(AccessGrant {
                resource_id: carevault_core::ResourceId::parse(&resource_id).ok()?,
                grantee_org_id: carevault_core::OrgId::parse(&grantee).ok()?,
                access_type,
                expiry_timestamp: expiry,
                is_active,
                granted_at,
                revoked_at: if is_active { None } else { Some(granted_at) },
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_core::OrgId;

    proptest! {
        #[test]
        fn test_case_variants_normalize(
            (id, variant) in org_id().prop_flat_map(|id| (Just(id.clone()), case_variant(id)))
        ) {
            prop_assert_eq!(OrgId::parse(&variant).unwrap(), OrgId::parse(&id).unwrap());
        }

        #[test]
        fn test_access_type_spellings_parse(spelling in access_type_spelling()) {
            prop_assert!(AccessType::parse_grantable(&spelling).is_ok());
        }

        #[test]
        fn test_grant_strategy_consistent(g in grant("patient-001", "lab-001")) {
            prop_assert_eq!(g.revoked_at.is_none(), g.is_active);
            prop_assert_ne!(g.access_type, AccessType::Owner);
        }
    }
}
