//! Encrypted backup and restore engine for Portvault.
//!
//! This module provides:
//! - The backup file codec (Argon2id + XChaCha20-Poly1305)
//! - The restore engine replaying a snapshot into a vault account
//! - The orchestrator sequencing session, export, codec and restore
//!
//! # Architecture
//! Backup flows vault -> export -> encode -> file; restore flows
//! file -> decode -> replay -> vault. Every tool interaction goes through
//! `portvault_bw`, one at a time.

pub mod codec;
pub mod orchestrator;
pub mod plain;
pub mod restore;
pub mod settings;

pub use codec::{
    read_backup, write_backup, BackupCodec, BackupHeader, EncryptedBackup, BACKUP_EXTENSION,
};
pub use orchestrator::BackupOrchestrator;
pub use restore::{EntryKind, RestoreEngine, RestoreEntry, RestoreReport, RestoreStatus};
pub use settings::{BackupSettings, DuplicatePolicy};
