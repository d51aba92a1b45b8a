//! Error taxonomy for credential store operations.
//!
//! Native-store failures are translated into these variants at the backend
//! boundary; callers never inspect platform error codes. Two variants are
//! warning-class: they report a degraded outcome that batch operations may
//! choose to continue past.

use thiserror::Error;

/// Errors produced by any credential store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No credential items matched the namespace query.
    #[error("namespace `{namespace}` is not defined")]
    NamespaceNotFound { namespace: String },

    /// The transport to the secret service failed in a way that is safe to
    /// retry from scratch with a fresh connection.
    #[error("transient secret service transport failure: {0}")]
    TransientTransport(String),

    /// The transient failure persisted across every allowed attempt.
    #[error("secret service search failed after {attempts} attempts")]
    ExhaustedRetries { attempts: u32 },

    /// The default collection could not be unlocked.
    #[error("failed to unlock the default collection: {0}")]
    LockedCollection(String),

    /// Reading or rewriting a keychain item's access control list failed.
    #[error("access control update failed: {0}")]
    AccessControl(String),

    /// The requested access policy has no equivalent on this platform.
    #[error("{feature} is unsupported on this platform")]
    UnsupportedPolicy { feature: &'static str },

    /// Any other native store failure, with the platform detail preserved.
    #[error("secret store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Warning-class outcomes: reported to the user, but a batch operation
    /// may continue past them. Everything else is terminal.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            StoreError::NamespaceNotFound { .. } | StoreError::UnsupportedPolicy { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        assert!(StoreError::NamespaceNotFound {
            namespace: "aws".to_string()
        }
        .is_warning());
        assert!(StoreError::UnsupportedPolicy {
            feature: "--require-passphrase"
        }
        .is_warning());

        assert!(!StoreError::TransientTransport("timeout".to_string()).is_warning());
        assert!(!StoreError::ExhaustedRetries { attempts: 3 }.is_warning());
        assert!(!StoreError::LockedCollection("dismissed".to_string()).is_warning());
        assert!(!StoreError::AccessControl("no ACL".to_string()).is_warning());
        assert!(!StoreError::Backend("I/O fault".to_string()).is_warning());
    }

    #[test]
    fn test_display_names_the_namespace() {
        let err = StoreError::NamespaceNotFound {
            namespace: "aws".to_string(),
        };
        assert_eq!(err.to_string(), "namespace `aws` is not defined");
    }

    #[test]
    fn test_display_preserves_native_detail() {
        let err = StoreError::Backend("org.freedesktop.DBus.Error.NoReply".to_string());
        assert!(err.to_string().contains("org.freedesktop.DBus.Error.NoReply"));
    }
}
