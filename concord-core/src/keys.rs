//! Key builder
//!
//! Pure string composers for every backing-store key. The layout is fixed:
//!
//! ```text
//! atlas:<namespace>:<uuid>:<region>:<major>.<minor>:<entity-key>
//! ```
//!
//! Entity keys starting with `_` are reserved for registry internals (expiry
//! sets, lock keys, counters, indexes, the tenant membership set) and are
//! never returned from listing operations.

use crate::tenant::Tenant;

/// Fixed process-wide key prefix.
pub const KEY_PREFIX: &str = "atlas";

/// Single separator between key segments.
pub const KEY_SEPARATOR: &str = ":";

/// Marker that introduces a reserved entity key.
pub const RESERVED_MARKER: char = '_';

/// Per-tenant sorted set tracking TTL registry expiries.
pub const EXPIRY_KEY: &str = "_expiry";

/// Segment under which lock keys live.
pub const LOCK_SEGMENT: &str = "_lock";

/// Counter key for identity allocation.
pub const ID_KEY: &str = "_id";

/// Segment under which secondary indexes live.
pub const INDEX_SEGMENT: &str = "_idx";

/// Per-namespace set of tenants that have written session state.
pub const TENANTS_KEY: &str = "_tenants";

/// `atlas:<namespace>[:<part>...]`
pub fn namespaced_key(namespace: &str, parts: &[&str]) -> String {
    let mut key = String::with_capacity(
        KEY_PREFIX.len() + namespace.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>() + 1,
    );
    key.push_str(KEY_PREFIX);
    key.push_str(KEY_SEPARATOR);
    key.push_str(namespace);
    for part in parts {
        key.push_str(KEY_SEPARATOR);
        key.push_str(part);
    }
    key
}

/// The tenant's key-path segment.
pub fn tenant_key(tenant: &Tenant) -> String {
    tenant.fingerprint()
}

/// `atlas:<namespace>:<fingerprint>:<entity_key>`
pub fn tenant_entity_key(namespace: &str, tenant: &Tenant, entity_key: &str) -> String {
    namespaced_key(namespace, &[tenant.fingerprint().as_str(), entity_key])
}

/// Glob matching every entity under the tenant, reserved keys included.
pub fn tenant_scan_pattern(namespace: &str, tenant: &Tenant) -> String {
    namespaced_key(namespace, &[tenant.fingerprint().as_str(), "*"])
}

/// Join entity-key parts with the key separator.
pub fn composite_key<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

/// Strip `atlas:<namespace>:<fingerprint>:` from a full key.
///
/// Returns `None` when the key does not belong to the tenant.
pub fn entity_suffix<'a>(full_key: &'a str, namespace: &str, tenant: &Tenant) -> Option<&'a str> {
    let prefix = namespaced_key(namespace, &[tenant.fingerprint().as_str(), ""]);
    full_key.strip_prefix(prefix.as_str())
}

/// True for entity keys reserved for registry internals.
pub fn is_reserved(entity_key: &str) -> bool {
    entity_key.starts_with(RESERVED_MARKER)
}

/// Entity key of a secondary index set: `_idx:<index>:<key>`.
pub fn index_entity_key(index_name: &str, key: &str) -> String {
    composite_key(&[INDEX_SEGMENT, index_name, key])
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn tenant() -> Tenant {
        Tenant::new(
            Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap(),
            "GMS",
            83,
            1,
        )
    }

    #[test]
    fn test_namespaced_key() {
        assert_eq!(namespaced_key("drops", &[]), "atlas:drops");
        assert_eq!(namespaced_key("drops", &["a", "b"]), "atlas:drops:a:b");
    }

    #[test]
    fn test_tenant_entity_key_is_bit_exact() {
        assert_eq!(
            tenant_entity_key("account-session", &tenant(), "42"),
            "atlas:account-session:00000000-0000-0000-0000-000000000001:GMS:83.1:42"
        );
    }

    #[test]
    fn test_scan_pattern_suffixes_glob() {
        assert_eq!(
            tenant_scan_pattern("drops", &tenant()),
            "atlas:drops:00000000-0000-0000-0000-000000000001:GMS:83.1:*"
        );
    }

    #[test]
    fn test_composite_key() {
        assert_eq!(composite_key(&["1", "100000000", "7"]), "1:100000000:7");
        assert_eq!(composite_key::<&str>(&[]), "");
    }

    #[test]
    fn test_entity_suffix_round_trip() {
        let t = tenant();
        let full = tenant_entity_key("drops", &t, "a:b");
        assert_eq!(entity_suffix(&full, "drops", &t), Some("a:b"));
        assert_eq!(entity_suffix(&full, "other", &t), None);

        let mut other = t.clone();
        other.region = "JMS".to_string();
        assert_eq!(entity_suffix(&full, "drops", &other), None);
    }

    #[test]
    fn test_reserved_keys() {
        assert!(is_reserved(EXPIRY_KEY));
        assert!(is_reserved(ID_KEY));
        assert!(is_reserved(TENANTS_KEY));
        assert!(is_reserved(&index_entity_key("name", "bob")));
        assert!(!is_reserved("1000"));
        assert_eq!(index_entity_key("name", "bob"), "_idx:name:bob");
    }
}
