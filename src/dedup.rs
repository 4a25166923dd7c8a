use std::collections::HashMap;

use crate::classify::{Role, ValidatedField};
use crate::db::StoredSession;

/// Roles that carry identity and take part in duplicate comparison.
pub const KEY_ROLES: &[Role] = &[Role::Aadhar, Role::Pan, Role::Name, Role::Email, Role::Phone];

/// Map the identity-bearing fields of a session to role -> value.
/// On role collision the last occurrence wins.
pub fn key_fields(fields: &[ValidatedField]) -> HashMap<&'static str, String> {
    let mut keys = HashMap::new();
    for field in fields {
        let role = field.validation.role;
        if KEY_ROLES.contains(&role) {
            keys.insert(role.as_str(), field.observation.value.clone());
        }
    }
    keys
}

/// A candidate is a duplicate iff some already-synced session for the same
/// URL agrees with it on every key the candidate provides. A candidate
/// with no key fields is never a duplicate; absence of keys cannot prove
/// duplication.
pub fn is_duplicate(url: &str, fields: &[ValidatedField], history: &[StoredSession]) -> bool {
    let keys = key_fields(fields);
    if keys.is_empty() {
        return false;
    }
    history.iter().any(|session| {
        if !session.synced || session.url != url {
            return false;
        }
        let theirs = key_fields(&session.fields);
        keys.iter().all(|(role, value)| theirs.get(role) == Some(value))
    })
}

// ── Tests ──
