//! Secret-holding types used throughout Portvault.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer token proving an unlocked, authenticated vault for one tool interaction.
///
/// The token is never written to disk by Portvault and is zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Session(String);

impl Session {
    /// Create a session from a raw token.
    ///
    /// # Errors
    /// - Returns error if the token is empty or contains whitespace
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Session token cannot be empty".to_string(),
            ));
        }
        if token.chars().any(char::is_whitespace) {
            return Err(crate::Error::InvalidInput(
                "Session token cannot contain whitespace".to_string(),
            ));
        }
        Ok(Self(token))
    }

    /// Get the raw token.
    ///
    /// # Security
    /// The returned value should only be handed to the vault tool.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session([REDACTED])")
    }
}

/// Passphrase protecting a backup file.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    /// Create a passphrase.
    ///
    /// # Errors
    /// - Returns `NoPassphrase` if the passphrase is empty
    pub fn new(passphrase: impl Into<String>) -> crate::Result<Self> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(crate::Error::NoPassphrase);
        }
        Ok(Self(passphrase))
    }

    /// Get the passphrase bytes for key derivation.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creation() {
        let session = Session::new("abc123def456").unwrap();
        assert_eq!(session.expose(), "abc123def456");
    }

    #[test]
    fn test_session_rejects_empty_and_whitespace() {
        assert!(Session::new("").is_err());
        assert!(Session::new("abc def").is_err());
    }

    #[test]
    fn test_session_debug_is_redacted() {
        let session = Session::new("super-secret-token").unwrap();
        let printed = format!("{:?}", session);
        assert!(!printed.contains("super-secret-token"));
    }

    #[test]
    fn test_empty_passphrase_is_no_passphrase() {
        assert!(matches!(
            Passphrase::new(""),
            Err(crate::Error::NoPassphrase)
        ));
    }

    #[test]
    fn test_passphrase_debug_is_redacted() {
        let passphrase = Passphrase::new("correct-horse").unwrap();
        assert_eq!(passphrase.as_bytes(), b"correct-horse");
        assert_eq!(format!("{:?}", passphrase), "Passphrase([REDACTED])");
    }

    #[test]
    fn test_sensitive_bytes_debug() {
        let bytes = SensitiveBytes::new(vec![1, 2, 3]);
        assert_eq!(bytes.len(), 3);
        assert_eq!(format!("{:?}", bytes), "SensitiveBytes([REDACTED; 3 bytes])");
    }
}
