//! Common error types for Portvault.

use thiserror::Error;

/// Top-level error type for Portvault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No backup passphrase was supplied.
    #[error("no passphrase provided")]
    NoPassphrase,

    /// No backup file name was supplied.
    #[error("no filename provided")]
    NoFilename,

    /// The vault tool reported that the vault is locked.
    #[error("vault is locked")]
    VaultLocked,

    /// The vault tool reported that no account is logged in.
    #[error("you are not logged in")]
    NotLoggedIn,

    /// The vault tool rejected the master password.
    #[error("invalid master password")]
    InvalidMasterPassword,

    /// The vault tool printed something that is neither a known failure nor a session token.
    #[error("session key extraction failed: {0}")]
    UnrecognizedOutput(String),

    /// Downloading one attachment failed; the backup is incomplete.
    #[error("failed to fetch attachment {attachment_id} of item {item_id}: {reason}")]
    AttachmentFetchFailed {
        item_id: String,
        attachment_id: String,
        reason: String,
    },

    /// The snapshot does not satisfy the attachment invariant and cannot be encoded.
    #[error("incomplete snapshot: {0}")]
    IncompleteSnapshot(String),

    /// Authentication of a backup file failed.
    ///
    /// A wrong passphrase and a corrupted file are indistinguishable from the
    /// tag alone, so both surface as this single kind.
    #[error("wrong passphrase or corrupted backup file")]
    WrongPassphraseOrCorrupted,

    /// The file is not a backup, or was written by a newer format version.
    #[error("unsupported backup format: {0}")]
    UnsupportedFormat(String),

    /// The vault tool failed with a message that matched no known failure.
    #[error("vault tool error: {0}")]
    Tool(String),

    /// Cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Whether this error came from the session layer (locked, logged out, bad credentials).
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Error::VaultLocked
                | Error::NotLoggedIn
                | Error::InvalidMasterPassword
                | Error::UnrecognizedOutput(_)
        )
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
