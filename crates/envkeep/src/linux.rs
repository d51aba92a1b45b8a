//! Secret Service backend: credentials as attribute-tagged items in the
//! default collection, reached over the D-Bus session bus.
//!
//! Items carry a schema attribute plus `name` (the namespace) and `key`
//! (the variable name); the secret content is the value. The collection may
//! need an interactive unlock before it yields anything, and the transport
//! is flaky enough in practice that searches are retried from scratch on
//! transport errors (see `retry`).

use std::collections::HashMap;

use secret_service::{EncryptionType, Error as SsError, SecretService};
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

use crate::error::{Result, StoreError};
use crate::namespaces;
use crate::retry::{with_transient_retry, MAX_SEARCH_ATTEMPTS};
use crate::secure::SecretBuffer;
use crate::store::{AccessPolicy, CredentialEntry, SecretStore};

/// Schema attribute value identifying this tool's items.
const SCHEMA: &str = "envkeep.EnvironmentVariable";
/// Attribute key libsecret-compatible clients match schemas on.
const SCHEMA_ATTR: &str = "xdg:schema";
/// Attribute holding the namespace.
const NAME_ATTR: &str = "name";
/// Attribute holding the environment variable name.
const KEY_ATTR: &str = "key";

/// Store backed by the session's Secret Service daemon.
///
/// The D-Bus connection is acquired inside each operation and dropped on
/// every exit path; nothing is shared across operations, so a retry always
/// starts from a fresh session.
pub struct SecretServiceStore {
    runtime: Runtime,
}

impl SecretServiceStore {
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| StoreError::Backend(format!("failed to start I/O runtime: {}", err)))?;
        Ok(Self { runtime })
    }
}

/// Map an error raised while talking to an already-established session
/// during a search: D-Bus transport failures are retryable.
fn transient(err: SsError) -> StoreError {
    match err {
        SsError::Zbus(detail) => StoreError::TransientTransport(detail.to_string()),
        other => terminal(other),
    }
}

/// Map an error where no retry applies.
fn terminal(err: SsError) -> StoreError {
    match err {
        SsError::Locked => {
            StoreError::LockedCollection("the default collection is locked".to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// Connect and make sure the default collection is unlocked.
///
/// When an unlock was needed, the pre-unlock session handle can be stale,
/// so the session is dropped and re-established before returning. A
/// collection that stays locked after a granted unlock is logged and
/// tolerated; the searches that follow simply come back empty.
async fn connect_unlocked() -> Result<SecretService<'static>> {
    let ss = SecretService::connect(EncryptionType::Dh)
        .await
        .map_err(terminal)?;
    let collection = ss.get_default_collection().await.map_err(terminal)?;

    if !collection.is_locked().await.map_err(terminal)? {
        drop(collection);
        return Ok(ss);
    }

    collection
        .unlock()
        .await
        .map_err(|err| StoreError::LockedCollection(err.to_string()))?;
    drop(collection);
    drop(ss);

    let ss = SecretService::connect(EncryptionType::Dh)
        .await
        .map_err(terminal)?;
    let collection = ss.get_default_collection().await.map_err(terminal)?;
    if collection.is_locked().await.map_err(terminal)? {
        warn!("default collection is still locked after unlock; searches may come back empty");
    }
    drop(collection);
    Ok(ss)
}

/// One search pass: fresh session, optional namespace filter, and the
/// secret payload only when the caller needs it (namespace enumeration
/// does not decrypt anything).
async fn search_collection(
    namespace: Option<&str>,
    load_secrets: bool,
) -> Result<Vec<(HashMap<String, String>, Option<SecretBuffer>)>> {
    let ss = connect_unlocked().await?;
    let collection = ss.get_default_collection().await.map_err(terminal)?;

    let mut attributes: HashMap<&str, &str> = HashMap::new();
    attributes.insert(SCHEMA_ATTR, SCHEMA);
    if let Some(name) = namespace {
        attributes.insert(NAME_ATTR, name);
    }

    let items = collection
        .search_items(attributes)
        .await
        .map_err(transient)?;

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let attrs = item.get_attributes().await.map_err(transient)?;
        let secret = if load_secrets {
            Some(SecretBuffer::new(
                item.get_secret().await.map_err(transient)?,
            ))
        } else {
            None
        };
        rows.push((attrs, secret));
    }
    Ok(rows)
}

impl SecretStore for SecretServiceStore {
    fn search_namespaces(&mut self) -> Result<Vec<String>> {
        let rows = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            self.runtime.block_on(search_collection(None, false))
        })?;

        let names = rows.into_iter().filter_map(|(mut attrs, _)| {
            let name = attrs.remove(NAME_ATTR);
            if name.is_none() {
                warn!("skipping secret service item without a name attribute");
            }
            name
        });
        Ok(namespaces::dedup_first_seen(names))
    }

    fn search_values(&mut self, namespace: &str) -> Result<Vec<CredentialEntry>> {
        let rows = with_transient_retry(MAX_SEARCH_ATTEMPTS, |_| {
            self.runtime
                .block_on(search_collection(Some(namespace), true))
        })?;

        if rows.is_empty() {
            return Err(StoreError::NamespaceNotFound {
                namespace: namespace.to_string(),
            });
        }

        let mut entries = Vec::with_capacity(rows.len());
        for (mut attrs, secret) in rows {
            let key = match attrs.remove(KEY_ATTR) {
                Some(key) => key,
                None => {
                    warn!("skipping secret service item without a key attribute");
                    continue;
                }
            };
            if let Some(value) = secret {
                entries.push(CredentialEntry { key, value });
            }
        }
        Ok(entries)
    }

    fn save_value(
        &mut self,
        namespace: &str,
        key: &str,
        value: &[u8],
        policy: AccessPolicy,
    ) -> Result<()> {
        self.runtime.block_on(async {
            let ss = connect_unlocked().await?;
            let collection = ss.get_default_collection().await.map_err(terminal)?;

            let mut attributes: HashMap<&str, &str> = HashMap::new();
            attributes.insert(SCHEMA_ATTR, SCHEMA);
            attributes.insert(NAME_ATTR, namespace);
            attributes.insert(KEY_ATTR, key);

            collection
                .create_item(key, attributes, value, true, "text/plain")
                .await
                .map_err(terminal)?;
            Ok(())
        })?;

        // The value is stored, but without the protection the caller asked
        // for; surface that so they can decide what to do about it.
        if policy == AccessPolicy::RequirePassphrase {
            return Err(StoreError::UnsupportedPolicy {
                feature: "--require-passphrase",
            });
        }
        Ok(())
    }

    fn delete_value(&mut self, namespace: &str, key: &str) -> Result<()> {
        self.runtime.block_on(async {
            let ss = connect_unlocked().await?;
            let collection = ss.get_default_collection().await.map_err(terminal)?;

            let mut attributes: HashMap<&str, &str> = HashMap::new();
            attributes.insert(SCHEMA_ATTR, SCHEMA);
            attributes.insert(NAME_ATTR, namespace);
            attributes.insert(KEY_ATTR, key);

            let items = collection
                .search_items(attributes)
                .await
                .map_err(terminal)?;
            for item in items {
                item.delete().await.map_err(terminal)?;
            }
            Ok(())
        })
    }
}
