//! Run settings for backup and restore.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use portvault_bw::DEFAULT_ATTACHMENT_DELAY_MS;
use portvault_common::Error;
use portvault_crypto::KdfParams;

/// Settings shared by backup and restore runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Delay between attachment downloads and uploads.
    pub attachment_delay: Duration,
    /// Leave the vault tool logged in when the run ends.
    pub no_logout: bool,
    /// Key derivation parameters for new backup files.
    pub kdf_params: KdfParams,
}

impl BackupSettings {
    /// Create settings with defaults.
    pub fn new() -> Self {
        Self {
            attachment_delay: Duration::from_millis(DEFAULT_ATTACHMENT_DELAY_MS),
            no_logout: false,
            kdf_params: KdfParams::default(),
        }
    }

    /// Set the attachment delay in milliseconds.
    pub fn with_attachment_delay_ms(mut self, millis: u64) -> Self {
        self.attachment_delay = Duration::from_millis(millis);
        self
    }

    /// Keep the vault tool logged in after the run.
    pub fn with_no_logout(mut self, no_logout: bool) -> Self {
        self.no_logout = no_logout;
        self
    }

    /// Set key derivation parameters.
    pub fn with_kdf_params(mut self, params: KdfParams) -> Self {
        self.kdf_params = params;
        self
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self::new()
    }
}

/// What restore does with items that already exist in the target vault.
///
/// There is deliberately no default: callers choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplicatePolicy {
    /// Create every item and folder, even if an equivalent one exists.
    CreateAll,
    /// Skip items matching an existing (type, name, username); reuse folders by name.
    SkipExisting,
}

impl FromStr for DuplicatePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" | "create-all" => Ok(Self::CreateAll),
            "skip" | "skip-existing" => Ok(Self::SkipExisting),
            other => Err(Error::InvalidInput(format!(
                "unknown duplicate policy '{}': use 'create' or 'skip'",
                other
            ))),
        }
    }
}
