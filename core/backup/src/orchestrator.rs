//! Sequences session, export, codec and restore into user-level operations.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::codec::{read_backup, write_backup, BackupCodec, EncryptedBackup, BACKUP_EXTENSION};
use crate::plain::write_plain_export;
use crate::restore::{RestoreEngine, RestoreReport};
use crate::settings::{BackupSettings, DuplicatePolicy};
use portvault_bw::{SessionManager, SessionState, VaultExportGateway};
use portvault_common::{Error, Passphrase, Result, VaultSnapshot};

/// Runs backup, decrypt and restore against one vault tool.
pub struct BackupOrchestrator {
    sessions: SessionManager,
    settings: BackupSettings,
}

impl BackupOrchestrator {
    /// Create an orchestrator.
    pub fn new(sessions: SessionManager, settings: BackupSettings) -> Self {
        Self { sessions, settings }
    }

    /// Settings in effect.
    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Session state of the underlying manager.
    pub fn session_state(&self) -> SessionState {
        self.sessions.state()
    }

    /// Export the vault and write an encrypted backup.
    ///
    /// Adds the `.portvault` extension when `destination` has none.
    ///
    /// # Postconditions
    /// - On success the returned path holds a complete backup
    /// - On failure no backup file is written
    /// - Unless `no_logout` is set, the tool is logged out either way
    ///
    /// # Errors
    /// - `NoFilename` for an empty destination, before any tool interaction
    /// - Session acquisition, export and attachment fetch failures, verbatim
    pub async fn backup(&mut self, destination: &Path, passphrase: &Passphrase) -> Result<PathBuf> {
        require_path(destination)?;
        let path = with_backup_extension(destination);

        let result = self.export_to(&path, passphrase).await;
        self.finish().await;

        result.map(|()| {
            info!("Backup written to {}", path.display());
            path
        })
    }

    async fn export_to(&mut self, path: &Path, passphrase: &Passphrase) -> Result<()> {
        let session = self.sessions.acquire_session_key().await?;
        let gateway = VaultExportGateway::new(
            self.sessions.client().clone(),
            self.settings.attachment_delay,
        );

        let mut snapshot = gateway.export_snapshot(&session).await?;
        gateway.fetch_attachments(&session, &mut snapshot).await?;

        let backup = encode(
            BackupCodec::new(self.settings.kdf_params),
            snapshot,
            passphrase.clone(),
        )
        .await?;
        write_backup(path, &backup).await
    }

    /// Decrypt a backup without touching the vault.
    ///
    /// # Errors
    /// - `NoFilename` for an empty source
    /// - `UnsupportedFormat`, `WrongPassphraseOrCorrupted`, or an I/O failure
    pub async fn decrypt_only(
        &self,
        source: &Path,
        passphrase: &Passphrase,
    ) -> Result<VaultSnapshot> {
        require_path(source)?;
        let backup = read_backup(source).await?;
        decode(backup, passphrase.clone()).await
    }

    /// Decrypt a backup into plain files under `out_dir`.
    pub async fn decrypt_to_dir(
        &self,
        source: &Path,
        passphrase: &Passphrase,
        out_dir: &Path,
    ) -> Result<VaultSnapshot> {
        require_path(out_dir)?;
        let snapshot = self.decrypt_only(source, passphrase).await?;
        write_plain_export(&snapshot, out_dir).await?;
        Ok(snapshot)
    }

    /// Decrypt a backup and replay it into the vault.
    ///
    /// The file is decoded before the vault is touched, so a wrong passphrase
    /// costs no tool interaction. The environment session is ignored: restore
    /// always logs out and acquires a fresh session.
    ///
    /// # Errors
    /// - `NoFilename` for an empty source
    /// - Decode failures
    /// - Logout failures, except when nobody was logged in
    /// - Session acquisition failures
    ///
    /// Per-entry failures are reported in the returned report.
    pub async fn restore_from_file(
        &mut self,
        source: &Path,
        passphrase: &Passphrase,
        policy: DuplicatePolicy,
    ) -> Result<RestoreReport> {
        let snapshot = self.decrypt_only(source, passphrase).await?;
        info!(
            "Restoring {} items, {} folders, {} attachments",
            snapshot.items.len(),
            snapshot.folders.len(),
            snapshot.attachments.len()
        );

        // Whoever is still logged in may not own the backup.
        self.sessions.logout().await?;
        self.sessions.forget_env_session();

        let result = self.replay(&snapshot, policy).await;
        self.finish().await;
        result
    }

    async fn replay(
        &mut self,
        snapshot: &VaultSnapshot,
        policy: DuplicatePolicy,
    ) -> Result<RestoreReport> {
        let session = self.sessions.acquire_session_key().await?;
        RestoreEngine::new(
            self.sessions.client().clone(),
            policy,
            self.settings.attachment_delay,
        )
        .restore(snapshot, &session)
        .await
    }

    /// Log out at the end of a run unless suppressed; failures are only logged.
    async fn finish(&mut self) {
        if self.settings.no_logout {
            return;
        }
        if let Err(err) = self.sessions.logout().await {
            warn!("Logout failed: {}", err);
        }
    }
}

fn require_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(Error::NoFilename);
    }
    Ok(())
}

/// `path` with the backup extension appended when it has none.
pub fn with_backup_extension(path: &Path) -> PathBuf {
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension(BACKUP_EXTENSION)
    }
}

// Key derivation is CPU-bound; keep it off the async workers.
async fn encode(
    codec: BackupCodec,
    snapshot: VaultSnapshot,
    passphrase: Passphrase,
) -> Result<EncryptedBackup> {
    tokio::task::spawn_blocking(move || codec.encode(&snapshot, &passphrase))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

async fn decode(backup: EncryptedBackup, passphrase: Passphrase) -> Result<VaultSnapshot> {
    tokio::task::spawn_blocking(move || BackupCodec::default().decode(&backup, &passphrase))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
