use std::collections::HashMap;

use zeroize::Zeroizing;

pub mod config;

pub type Attributes = HashMap<String, String>;

/// Attribute key tying an item to its owning collection's object path.
pub const ATTR_COLLECTION: &str = "xdg:collection";

/// Attribute key naming the item's schema; defaulted when absent.
pub const ATTR_SCHEMA: &str = "xdg:schema";

/// Schema value stamped onto items that don't declare one.
pub const GENERIC_SCHEMA: &str = "org.freedesktop.Secret.Generic";

/// Opaque secret payload. The buffer is scrubbed on drop and never printed.
pub struct SecretBytes(Zeroizing<Vec<u8>>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Create from an already-zeroizing buffer (avoids a plain copy).
    pub fn from_zeroizing(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBytes([redacted])")
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(Zeroizing::new(self.0.to_vec()))
    }
}

/// Tagged error for every core operation.
///
/// Interface code converts these to bus errors at the dispatch boundary; the
/// core never constructs a wire error directly.
#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("not supported: {0}")]
    NotSupported(String),
    #[error("no such session: {0}")]
    NoSession(String),
    #[error("no such object: {0}")]
    NoSuchObject(String),
    #[error("decryption failed: {0}")]
    Crypto(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_bytes_debug_is_redacted() {
        let secret = SecretBytes::new(b"hunter2".to_vec());
        assert_eq!(format!("{secret:?}"), "SecretBytes([redacted])");
    }

    #[test]
    fn secret_bytes_clone_preserves_content() {
        let secret = SecretBytes::new(vec![1, 2, 3]);
        assert_eq!(secret.clone().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn error_messages_carry_context() {
        let err = ServiceError::NoSuchObject("/org/freedesktop/secrets/item/i9".to_string());
        assert!(err.to_string().contains("item/i9"));
    }
}
