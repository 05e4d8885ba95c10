//! In-memory representation of an exported vault.
//!
//! Items and folders keep every field the vault tool exports: the fields
//! Portvault needs are typed, everything else rides along in `extra` so a
//! restore replays the item as it was exported.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::{Error, Result};

/// A folder as exported by the vault tool.
///
/// The tool lists a synthetic "No Folder" entry without an id; it is kept so
/// the export is faithful, and ignored on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Folder {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference from an item to one of its attachments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One vault item (login, secure note, card or identity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "folderId", default)]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VaultItem {
    /// Numeric item type as reported by the tool (1 login, 2 note, 3 card, 4 identity).
    pub fn item_type(&self) -> Option<i64> {
        self.extra.get("type").and_then(Value::as_i64)
    }

    /// Username of a login item, if any.
    pub fn login_username(&self) -> Option<&str> {
        self.extra
            .get("login")
            .and_then(|login| login.get("username"))
            .and_then(Value::as_str)
    }
}

/// Raw bytes of one attachment plus the metadata identifying it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentBlob {
    pub item_id: String,
    pub attachment_id: String,
    pub file_name: String,
    pub size: u64,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

impl AttachmentBlob {
    /// Wrap fetched bytes; `size` is taken from the data.
    pub fn new(
        item_id: impl Into<String>,
        attachment_id: impl Into<String>,
        file_name: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            attachment_id: attachment_id.into(),
            file_name: file_name.into(),
            size: data.len() as u64,
            data,
        }
    }

    /// The attachment contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for AttachmentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentBlob")
            .field("item_id", &self.item_id)
            .field("attachment_id", &self.attachment_id)
            .field("file_name", &self.file_name)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Structured export of a vault at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub folders: Vec<Folder>,
    pub items: Vec<VaultItem>,
    #[serde(default)]
    pub attachments: Vec<AttachmentBlob>,
}

impl VaultSnapshot {
    /// Create a snapshot without attachment bytes.
    pub fn new(folders: Vec<Folder>, items: Vec<VaultItem>) -> Self {
        Self {
            exported_at: Utc::now(),
            folders,
            items,
            attachments: Vec::new(),
        }
    }

    /// All attachment references, in item order.
    pub fn attachment_refs(&self) -> impl Iterator<Item = (&VaultItem, &AttachmentRef)> {
        self.items
            .iter()
            .flat_map(|item| item.attachments.iter().map(move |att| (item, att)))
    }

    /// Number of attachment references across all items.
    pub fn attachment_count(&self) -> usize {
        self.items.iter().map(|item| item.attachments.len()).sum()
    }

    /// Look up the fetched blob for one attachment reference.
    pub fn blob(&self, item_id: &str, attachment_id: &str) -> Option<&AttachmentBlob> {
        self.attachments
            .iter()
            .find(|blob| blob.item_id == item_id && blob.attachment_id == attachment_id)
    }

    /// Check that every attachment reference resolves to exactly one blob.
    ///
    /// # Errors
    /// - `IncompleteSnapshot` for a missing, duplicated or unreferenced blob,
    ///   or a blob whose recorded size disagrees with its data
    pub fn validate(&self) -> Result<()> {
        let mut blobs: HashMap<(&str, &str), usize> = HashMap::new();
        for blob in &self.attachments {
            if blob.size != blob.data.len() as u64 {
                return Err(Error::IncompleteSnapshot(format!(
                    "attachment {} of item {} records {} bytes but holds {}",
                    blob.attachment_id,
                    blob.item_id,
                    blob.size,
                    blob.data.len()
                )));
            }
            *blobs
                .entry((blob.item_id.as_str(), blob.attachment_id.as_str()))
                .or_default() += 1;
        }

        for (item, att) in self.attachment_refs() {
            match blobs.remove(&(item.id.as_str(), att.id.as_str())) {
                Some(1) => {}
                Some(n) => {
                    return Err(Error::IncompleteSnapshot(format!(
                        "attachment {} of item {} was fetched {} times",
                        att.id, item.id, n
                    )))
                }
                None => {
                    return Err(Error::IncompleteSnapshot(format!(
                        "attachment {} of item {} was not fetched",
                        att.id, item.id
                    )))
                }
            }
        }

        if let Some(((item_id, attachment_id), _)) = blobs.into_iter().next() {
            return Err(Error::IncompleteSnapshot(format!(
                "attachment {} of item {} is not referenced by any item",
                attachment_id, item_id
            )));
        }

        Ok(())
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
