//! envkeep - Namespaced secrets in the OS credential store
//!
//! "Credentials belong in the keychain, not in dotfiles."
//!
//! API keys and tokens are stored as items in the platform's native secure
//! store (the macOS Keychain, or the D-Bus Secret Service on Linux), grouped
//! under user-chosen namespaces, and injected into a child process's
//! environment on demand. This tool persists nothing of its own; the
//! platform store is the sole source of truth, and decrypted values are
//! wiped from memory before their buffers are released.

pub mod error;
pub mod memory;
pub mod namespaces;
pub mod retry;
pub mod secure;
pub mod store;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use secure::SecretBuffer;
pub use store::{collect_env, open_default_store, AccessPolicy, CredentialEntry, SecretStore};
