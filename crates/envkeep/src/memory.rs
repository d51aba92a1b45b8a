//! In-memory credential store used by tests.
//!
//! Keeps the trait honest on machines without a native store: entries are
//! held per namespace in insertion order, upserts replace in place the way
//! both native upserts do, and the last explicit access policy applied to
//! each entry is recorded so policy plumbing can be asserted.

use std::collections::HashMap;

use crate::error::{Result, StoreError};
use crate::namespaces;
use crate::secure::SecretBuffer;
use crate::store::{AccessPolicy, CredentialEntry, SecretStore};

#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, Vec<(String, SecretBuffer)>>,
    policies: HashMap<(String, String), AccessPolicy>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The policy most recently applied to `(namespace, key)` with
    /// something other than [`AccessPolicy::Unspecified`].
    pub fn policy_for(&self, namespace: &str, key: &str) -> Option<AccessPolicy> {
        self.policies
            .get(&(namespace.to_string(), key.to_string()))
            .copied()
    }
}

impl SecretStore for MemoryStore {
    fn search_namespaces(&mut self) -> Result<Vec<String>> {
        let names = self
            .entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        Ok(namespaces::dedup_sorted(names))
    }

    fn search_values(&mut self, namespace: &str) -> Result<Vec<CredentialEntry>> {
        let entries = self.entries.get(namespace);
        match entries {
            Some(entries) if !entries.is_empty() => Ok(entries
                .iter()
                .map(|(key, value)| CredentialEntry {
                    key: key.clone(),
                    value: value.clone(),
                })
                .collect()),
            _ => Err(StoreError::NamespaceNotFound {
                namespace: namespace.to_string(),
            }),
        }
    }

    fn save_value(
        &mut self,
        namespace: &str,
        key: &str,
        value: &[u8],
        policy: AccessPolicy,
    ) -> Result<()> {
        let entries = self.entries.entry(namespace.to_string()).or_default();
        let value = SecretBuffer::new(value.to_vec());
        match entries.iter_mut().find(|(name, _)| name == key) {
            Some((_, existing)) => *existing = value,
            None => entries.push((key.to_string(), value)),
        }
        if policy != AccessPolicy::Unspecified {
            self.policies
                .insert((namespace.to_string(), key.to_string()), policy);
        }
        Ok(())
    }

    fn delete_value(&mut self, namespace: &str, key: &str) -> Result<()> {
        if let Some(entries) = self.entries.get_mut(namespace) {
            entries.retain(|(name, _)| name != key);
            if entries.is_empty() {
                self.entries.remove(namespace);
            }
        }
        self.policies
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
