//! Common utilities and types shared across Portvault modules.
//!
//! This module provides the error type used by every library crate, the
//! secret-holding wrappers (`Session`, `Passphrase`) that keep credentials out
//! of logs, and the snapshot model exchanged between export, codec and restore.

pub mod error;
pub mod snapshot;
pub mod types;

pub use error::{Error, Result};
pub use snapshot::{AttachmentBlob, AttachmentRef, Folder, VaultItem, VaultSnapshot};
pub use types::{Passphrase, SensitiveBytes, Session};
