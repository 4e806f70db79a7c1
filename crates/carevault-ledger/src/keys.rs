//! Composite state keys.
//!
//! A key is an object type followed by its attributes, each terminated by a
//! NUL byte:
//!
//! ```text
//! \0ACCESS\0patient-001\0lab-001\0
//! ```
//!
//! Because every component is terminated, a key built from a prefix of the
//! attributes is a byte prefix of every full key that extends it, which is
//! what [`StateStore::scan_prefix`](crate::StateStore::scan_prefix) relies on.

const SEPARATOR: char = '\u{0}';

/// Organization records, keyed by `[orgId]`.
pub const ORG: &str = "ORG";

/// Resource records, keyed by `[resourceId]`.
pub const RESOURCE: &str = "RESOURCE";

/// Access grants, keyed by `[resourceId, orgId]`.
pub const ACCESS: &str = "ACCESS";

/// Audit entries, keyed by `[resourceId, auditId]`.
pub const AUDIT: &str = "AUDIT";

/// Build a composite key. Also used with a partial attribute list to build a
/// scan prefix.
pub fn composite_key(object_type: &str, attributes: &[&str]) -> String {
    let len = 2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>();
    let mut key = String::with_capacity(len);
    key.push(SEPARATOR);
    key.push_str(object_type);
    key.push(SEPARATOR);
    for attribute in attributes {
        key.push_str(attribute);
        key.push(SEPARATOR);
    }
    key
}

/// Split a composite key back into its object type and attributes.
pub fn split_composite_key(key: &str) -> Option<(&str, Vec<&str>)> {
    let body = key.strip_prefix(SEPARATOR)?.strip_suffix(SEPARATOR)?;
    let mut parts = body.split(SEPARATOR);
    let object_type = parts.next()?;
    Some((object_type, parts.collect()))
}

pub fn org_key(org_id: &str) -> String {
    composite_key(ORG, &[org_id])
}

pub fn resource_key(resource_id: &str) -> String {
    composite_key(RESOURCE, &[resource_id])
}

pub fn access_key(resource_id: &str, org_id: &str) -> String {
    composite_key(ACCESS, &[resource_id, org_id])
}

pub fn audit_key(resource_id: &str, audit_id: &str) -> String {
    composite_key(AUDIT, &[resource_id, audit_id])
}

/// Audit ids combine the event coordinates with a transaction-id prefix so
/// that repeated events in the same second stay distinct.
pub fn audit_id(resource_id: &str, actor_org_id: &str, access_timestamp: i64, tx_id: &str) -> String {
    let tx_prefix = tx_id.get(..8).unwrap_or(tx_id);
    format!("AUDIT_{resource_id}_{actor_org_id}_{access_timestamp}_{tx_prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(access_key("r1", "o1"), "\u{0}ACCESS\u{0}r1\u{0}o1\u{0}");
        assert_eq!(composite_key(ORG, &[]), "\u{0}ORG\u{0}");
    }

    #[test]
    fn test_partial_key_is_prefix() {
        let prefix = composite_key(AUDIT, &["patient-001"]);
        assert!(audit_key("patient-001", "a").starts_with(&prefix));
        // A resource whose id extends another's must not match its prefix.
        assert!(!audit_key("patient-0010", "a").starts_with(&prefix));
    }

    #[test]
    fn test_split() {
        let key = access_key("patient-001", "lab-001");
        let (object_type, attrs) = split_composite_key(&key).unwrap();
        assert_eq!(object_type, ACCESS);
        assert_eq!(attrs, vec!["patient-001", "lab-001"]);
        assert!(split_composite_key("plain").is_none());
    }

    #[test]
    fn test_audit_id_uses_tx_prefix() {
        let id = audit_id("r", "o", 42, "abcdef0123456789");
        assert_eq!(id, "AUDIT_r_o_42_abcdef01");
        assert_eq!(audit_id("r", "o", 42, "abc"), "AUDIT_r_o_42_abc");
    }
}
