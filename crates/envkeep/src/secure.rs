//! Zeroized buffers for decrypted secret material.
//!
//! Every plaintext byte that leaves the platform store is held in a
//! [`SecretBuffer`], which overwrites its contents before the backing
//! storage is released. Early returns, error paths, and unwinding all go
//! through the same zeroizing drop.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// An owned byte buffer that is wiped when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBuffer {
    bytes: Vec<u8>,
}

impl SecretBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Borrow the raw plaintext.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// View the plaintext as UTF-8.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<String> for SecretBuffer {
    fn from(value: String) -> Self {
        Self {
            bytes: value.into_bytes(),
        }
    }
}

impl From<&str> for SecretBuffer {
    fn from(value: &str) -> Self {
        Self {
            bytes: value.as_bytes().to_vec(),
        }
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBuffer({} bytes redacted)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let buffer = SecretBuffer::from("AKIA123");
        assert_eq!(buffer.as_bytes(), b"AKIA123");
        assert_eq!(buffer.as_str().unwrap(), "AKIA123");
        assert_eq!(buffer.len(), 7);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_debug_is_redacted() {
        let buffer = SecretBuffer::from("hunter2");
        let rendered = format!("{:?}", buffer);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("redacted"));
    }

    #[test]
    fn test_zeroize_clears_contents() {
        let mut buffer = SecretBuffer::from("hunter2");
        buffer.zeroize();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_non_utf8_is_reported() {
        let buffer = SecretBuffer::new(vec![0xff, 0xfe]);
        assert!(buffer.as_str().is_err());
    }
}
