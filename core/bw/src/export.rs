//! Vault export through the vault tool.
//!
//! Attachments are downloaded one at a time with a fixed delay between
//! requests. A single failed download aborts the export: a backup missing
//! an attachment must never be written.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::BwClient;
use crate::throttle::Throttle;
use portvault_common::{AttachmentBlob, AttachmentRef, Error, Result, Session, VaultSnapshot};

/// Exports vault contents and attachment bytes.
pub struct VaultExportGateway {
    client: BwClient,
    attachment_delay: Duration,
}

impl VaultExportGateway {
    /// Create a gateway with the given delay between attachment downloads.
    pub fn new(client: BwClient, attachment_delay: Duration) -> Self {
        Self {
            client,
            attachment_delay,
        }
    }

    /// Export folders and items, without attachment bytes.
    ///
    /// A failed `sync` is logged and the local copy is exported.
    pub async fn export_snapshot(&self, session: &Session) -> Result<VaultSnapshot> {
        if let Err(err) = self.client.sync(session).await {
            warn!("Vault sync failed, exporting local copy: {}", err);
        }

        let folders = self.client.list_folders(session).await?;
        let items = self.client.list_items(session).await?;
        let snapshot = VaultSnapshot::new(folders, items);

        info!(
            "Exported {} items, {} folders, {} attachment references",
            snapshot.items.len(),
            snapshot.folders.len(),
            snapshot.attachment_count()
        );
        Ok(snapshot)
    }

    /// Download one attachment.
    ///
    /// # Errors
    /// - `AttachmentFetchFailed` if the tool fails or the file cannot be read
    pub async fn fetch_attachment(
        &self,
        session: &Session,
        item_id: &str,
        attachment: &AttachmentRef,
    ) -> Result<AttachmentBlob> {
        let staging = tempfile::tempdir()?;
        self.fetch_into(session, item_id, attachment, staging.path())
            .await
    }

    /// Download every referenced attachment into `snapshot`, in item order.
    ///
    /// # Postconditions
    /// - On success, `snapshot.validate()` holds
    ///
    /// # Errors
    /// - `AttachmentFetchFailed` on the first failed download; the snapshot
    ///   must then be discarded
    pub async fn fetch_attachments(
        &self,
        session: &Session,
        snapshot: &mut VaultSnapshot,
    ) -> Result<()> {
        let staging = tempfile::tempdir()?;
        let mut throttle = Throttle::new(self.attachment_delay);
        let total = snapshot.attachment_count();
        let mut blobs = Vec::with_capacity(total);

        for (index, (item, attachment)) in snapshot.attachment_refs().enumerate() {
            debug!("Fetching attachment {}/{}", index + 1, total);
            let blob = throttle
                .run(self.fetch_into(session, &item.id, attachment, staging.path()))
                .await?;
            blobs.push(blob);
        }

        snapshot.attachments = blobs;
        if total > 0 {
            info!("Fetched {} attachments", total);
        }
        Ok(())
    }

    async fn fetch_into(
        &self,
        session: &Session,
        item_id: &str,
        attachment: &AttachmentRef,
        staging: &Path,
    ) -> Result<AttachmentBlob> {
        let fetch_failed = |reason: String| Error::AttachmentFetchFailed {
            item_id: item_id.to_string(),
            attachment_id: attachment.id.clone(),
            reason,
        };

        // Named by id so file names from the vault never touch the path.
        let output = staging.join(format!("{}-{}", item_id, attachment.id));
        self.client
            .get_attachment(session, item_id, &attachment.id, &output)
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;

        let data = tokio::fs::read(&output)
            .await
            .map_err(|e| fetch_failed(e.to_string()))?;
        let _ = tokio::fs::remove_file(&output).await;

        Ok(AttachmentBlob::new(
            item_id,
            attachment.id.clone(),
            attachment.file_name.clone(),
            data,
        ))
    }
}
