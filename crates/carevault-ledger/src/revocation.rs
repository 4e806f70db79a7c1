//! Revocation composition.
//!
//! Two independent sources can revoke an organization: the ledger's own
//! `isRevoked` flag and the runtime override layer. Either one denies.

/// Combine the ledger flag with the override signal.
pub fn is_denied(ledger_revoked: bool, override_revoked: bool) -> bool {
    ledger_revoked || override_revoked
}
