//! Plain (unencrypted) export of a decrypted snapshot.
//!
//! Layout under the output directory:
//!
//! ```text
//! items.json
//! folders.json
//! attachments/<item id>/<file name>
//! ```

use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

use crate::restore::safe_file_name;
use portvault_common::{Error, Result, VaultSnapshot};

/// Write `snapshot` as plain files under `out_dir`, creating it if needed.
///
/// # Errors
/// - `InvalidInput` if `out_dir` exists and is not an empty directory
/// - Any I/O failure while writing
pub async fn write_plain_export(snapshot: &VaultSnapshot, out_dir: &Path) -> Result<()> {
    if out_dir.exists() {
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        if entries.next_entry().await?.is_some() {
            return Err(Error::InvalidInput(format!(
                "output directory {} is not empty",
                out_dir.display()
            )));
        }
    }
    tokio::fs::create_dir_all(out_dir).await?;

    write_json(&out_dir.join("items.json"), &snapshot.items).await?;
    write_json(&out_dir.join("folders.json"), &snapshot.folders).await?;

    for blob in &snapshot.attachments {
        let dir = out_dir
            .join("attachments")
            .join(safe_file_name(&blob.item_id));
        tokio::fs::create_dir_all(&dir).await?;

        let mut path = dir.join(safe_file_name(&blob.file_name));
        if tokio::fs::try_exists(&path).await? {
            // Two attachments of one item can share a file name.
            warn!("Duplicate attachment name {}, suffixing with its id", blob.file_name);
            path = dir.join(format!(
                "{}-{}",
                safe_file_name(&blob.attachment_id),
                safe_file_name(&blob.file_name)
            ));
        }
        tokio::fs::write(&path, blob.data()).await?;
    }

    info!(
        "Wrote {} items, {} folders, {} attachments to {}",
        snapshot.items.len(),
        snapshot.folders.len(),
        snapshot.attachments.len(),
        out_dir.display()
    );
    Ok(())
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json =
        serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization(e.to_string()))?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portvault_common::{AttachmentBlob, VaultItem};
    use serde_json::{json, Value};

    fn snapshot() -> VaultSnapshot {
        let item: VaultItem = serde_json::from_value(json!({
            "id": "item-1", "name": "Server", "type": 1,
            "attachments": [
                { "id": "a1", "fileName": "id_rsa" },
                { "id": "a2", "fileName": "id_rsa" }
            ]
        }))
        .unwrap();
        let mut snapshot = VaultSnapshot::new(Vec::new(), vec![item]);
        snapshot
            .attachments
            .push(AttachmentBlob::new("item-1", "a1", "id_rsa", b"first".to_vec()));
        snapshot
            .attachments
            .push(AttachmentBlob::new("item-1", "a2", "id_rsa", b"second".to_vec()));
        snapshot
    }

    #[tokio::test]
    async fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("plain");

        write_plain_export(&snapshot(), &out).await.unwrap();

        let items: Value =
            serde_json::from_slice(&std::fs::read(out.join("items.json")).unwrap()).unwrap();
        assert_eq!(items[0]["name"], "Server");
        let folders: Value =
            serde_json::from_slice(&std::fs::read(out.join("folders.json")).unwrap()).unwrap();
        assert_eq!(folders, json!([]));

        let attachments = out.join("attachments").join("item-1");
        assert_eq!(std::fs::read(attachments.join("id_rsa")).unwrap(), b"first");
        assert_eq!(std::fs::read(attachments.join("a2-id_rsa")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_refuses_non_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "x").unwrap();

        assert!(matches!(
            write_plain_export(&snapshot(), dir.path()).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
