//! The credential store contract shared by every backend.
//!
//! One trait, three implementations: the macOS keychain, the D-Bus Secret
//! Service, and an in-memory store for tests. The platform backend is
//! picked at startup by [`open_default_store`].

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::secure::SecretBuffer;

/// One secret under a namespace: an environment variable name and its value.
#[derive(Debug, Clone)]
pub struct CredentialEntry {
    pub key: String,
    pub value: SecretBuffer,
}

/// What retrieving a saved secret should require from the user.
///
/// Only the macOS keychain can express this per item; the Secret Service
/// backend rejects `RequirePassphrase` and treats the other two as no-ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Leave the item's existing access rule untouched.
    #[default]
    Unspecified,
    /// Prompt for the keychain passphrase on every access, including by
    /// this tool itself.
    RequirePassphrase,
    /// Grant silent access to this executable only.
    NoPassphraseRequired,
}

/// The operations every backend provides.
///
/// All calls are synchronous and may block on OS-level interaction (unlock
/// dialogs, access confirmations); that interaction belongs to the call and
/// is never time-limited here.
pub trait SecretStore {
    /// Every namespace with at least one stored value, deduplicated. The
    /// keychain backend additionally sorts; the Secret Service backend
    /// keeps store enumeration order (see `namespaces`). An empty store
    /// yields an empty list, not an error.
    fn search_namespaces(&mut self) -> Result<Vec<String>>;

    /// All key/value pairs under `namespace`, in store enumeration order.
    /// Zero matching items is [`StoreError::NamespaceNotFound`].
    fn search_values(&mut self, namespace: &str) -> Result<Vec<CredentialEntry>>;

    /// Create or replace the value for `(namespace, key)`. The access
    /// policy is re-applied only when it is not
    /// [`AccessPolicy::Unspecified`]. `value` is treated as sensitive for
    /// the duration of the call.
    fn save_value(
        &mut self,
        namespace: &str,
        key: &str,
        value: &[u8],
        policy: AccessPolicy,
    ) -> Result<()>;

    /// Remove the value for `(namespace, key)`. Deleting an absent entry
    /// succeeds.
    fn delete_value(&mut self, namespace: &str, key: &str) -> Result<()>;
}

/// Open the native store for the current platform.
pub fn open_default_store() -> Result<Box<dyn SecretStore>> {
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(crate::macos::KeychainStore::open()?))
    }
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(crate::linux::SecretServiceStore::new()?))
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Err(StoreError::Backend(
            "no native credential store backend for this platform".to_string(),
        ))
    }
}

/// Resolve the variables to inject for namespaces given in order.
///
/// Namespaces are processed strictly left to right; a key defined by more
/// than one namespace keeps the value from the namespace named last, and
/// duplicate keys inside one namespace resolve to the entry enumerated
/// last. Undefined namespaces are appended to `missing` and skipped; any
/// other failure aborts the whole batch.
pub fn collect_env(
    store: &mut dyn SecretStore,
    namespaces: &[&str],
    missing: &mut Vec<String>,
) -> Result<Vec<(String, SecretBuffer)>> {
    let mut order: Vec<String> = Vec::new();
    let mut values: HashMap<String, SecretBuffer> = HashMap::new();

    for namespace in namespaces {
        match store.search_values(namespace) {
            Ok(entries) => {
                for entry in entries {
                    if !values.contains_key(&entry.key) {
                        order.push(entry.key.clone());
                    }
                    values.insert(entry.key, entry.value);
                }
            }
            Err(StoreError::NamespaceNotFound { namespace }) => missing.push(namespace),
            Err(err) => return Err(err),
        }
    }

    let mut env = Vec::with_capacity(order.len());
    for key in order {
        if let Some(value) = values.remove(&key) {
            env.push((key, value));
        }
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn value_of<'a>(env: &'a [(String, SecretBuffer)], key: &str) -> Option<&'a str> {
        env.iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str().unwrap())
    }

    #[test]
    fn test_collect_env_sets_every_key() {
        let mut store = MemoryStore::new();
        store
            .save_value("aws", "ACCESS_KEY", b"AKIA123", AccessPolicy::Unspecified)
            .unwrap();
        store
            .save_value("aws", "SECRET_KEY", b"deadbeef", AccessPolicy::Unspecified)
            .unwrap();

        let mut missing = Vec::new();
        let env = collect_env(&mut store, &["aws"], &mut missing).unwrap();

        assert!(missing.is_empty());
        assert_eq!(env.len(), 2);
        assert_eq!(value_of(&env, "ACCESS_KEY"), Some("AKIA123"));
        assert_eq!(value_of(&env, "SECRET_KEY"), Some("deadbeef"));
    }

    #[test]
    fn test_collect_env_last_namespace_wins() {
        let mut store = MemoryStore::new();
        store
            .save_value("a", "FOO", b"from-a", AccessPolicy::Unspecified)
            .unwrap();
        store
            .save_value("b", "FOO", b"from-b", AccessPolicy::Unspecified)
            .unwrap();

        let mut missing = Vec::new();
        let env = collect_env(&mut store, &["a", "b"], &mut missing).unwrap();

        assert_eq!(env.len(), 1);
        assert_eq!(value_of(&env, "FOO"), Some("from-b"));
    }

    #[test]
    fn test_collect_env_reports_missing_and_continues() {
        let mut store = MemoryStore::new();
        store
            .save_value("b", "FOO", b"from-b", AccessPolicy::Unspecified)
            .unwrap();

        let mut missing = Vec::new();
        let env = collect_env(&mut store, &["a", "b"], &mut missing).unwrap();

        assert_eq!(missing, vec!["a".to_string()]);
        assert_eq!(value_of(&env, "FOO"), Some("from-b"));
    }

    #[test]
    fn test_collect_env_preserves_first_seen_order() {
        let mut store = MemoryStore::new();
        store
            .save_value("a", "FIRST", b"1", AccessPolicy::Unspecified)
            .unwrap();
        store
            .save_value("a", "SECOND", b"2", AccessPolicy::Unspecified)
            .unwrap();
        store
            .save_value("b", "FIRST", b"override", AccessPolicy::Unspecified)
            .unwrap();

        let mut missing = Vec::new();
        let env = collect_env(&mut store, &["a", "b"], &mut missing).unwrap();

        let keys: Vec<&str> = env.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(keys, vec!["FIRST", "SECOND"]);
        assert_eq!(value_of(&env, "FIRST"), Some("override"));
    }

    #[test]
    fn test_default_policy_is_unspecified() {
        assert_eq!(AccessPolicy::default(), AccessPolicy::Unspecified);
    }
}
