//! Replays a decrypted snapshot into a vault account.
//!
//! Folders are created first so items can be re-parented to the new folder
//! ids. Each item's attachments are uploaded right after the item, paced by
//! one throttle shared across the whole run. A failed entry is recorded and
//! the run continues.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::settings::DuplicatePolicy;
use portvault_bw::{BwClient, Throttle};
use portvault_common::{AttachmentRef, Error, Result, Session, VaultItem, VaultSnapshot};

/// Fields assigned by the server that must not be replayed on create.
const SERVER_FIELDS: &[&str] = &[
    "id",
    "attachments",
    "organizationId",
    "collectionIds",
    "revisionDate",
    "creationDate",
    "deletedDate",
];

/// What a report entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Folder,
    Item,
    Attachment,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Folder => write!(f, "folder"),
            EntryKind::Item => write!(f, "item"),
            EntryKind::Attachment => write!(f, "attachment"),
        }
    }
}

/// Outcome of restoring one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    /// Created; the new id when the tool reports one.
    Created { id: Option<String> },
    Skipped { reason: String },
    Failed { reason: String },
}

impl fmt::Display for RestoreStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestoreStatus::Created { id: Some(id) } => write!(f, "created ({})", id),
            RestoreStatus::Created { id: None } => write!(f, "created"),
            RestoreStatus::Skipped { reason } => write!(f, "skipped: {}", reason),
            RestoreStatus::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// One line of a restore report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreEntry {
    pub kind: EntryKind,
    pub label: String,
    pub status: RestoreStatus,
}

/// Per-entry outcomes of a restore, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub entries: Vec<RestoreEntry>,
}

impl RestoreReport {
    fn record(&mut self, kind: EntryKind, label: impl Into<String>, status: RestoreStatus) {
        let label = label.into();
        match &status {
            RestoreStatus::Failed { reason } => {
                warn!("Restoring {} '{}' failed: {}", kind, label, reason)
            }
            status => debug!("Restoring {} '{}': {}", kind, label, status),
        }
        self.entries.push(RestoreEntry {
            kind,
            label,
            status,
        });
    }

    /// Entries of `kind`.
    pub fn of_kind(&self, kind: EntryKind) -> impl Iterator<Item = &RestoreEntry> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Number of created entries.
    pub fn created(&self) -> usize {
        self.count(|s| matches!(s, RestoreStatus::Created { .. }))
    }

    /// Number of skipped entries.
    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, RestoreStatus::Skipped { .. }))
    }

    /// Number of failed entries.
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, RestoreStatus::Failed { .. }))
    }

    /// Failed entries.
    pub fn failures(&self) -> impl Iterator<Item = &RestoreEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, RestoreStatus::Failed { .. }))
    }

    /// True when nothing failed.
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&RestoreStatus) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.status)).count()
    }
}

/// Identity used to recognise an item that already exists in the target vault.
type ItemKey = (Option<i64>, String, Option<String>);

fn item_key(item: &VaultItem) -> ItemKey {
    (
        item.item_type(),
        item.name.clone(),
        item.login_username().map(str::to_string),
    )
}

/// What the target vault held before the run, for `SkipExisting`.
///
/// Loaded once and never updated with entries the run creates: two entries
/// of the backup that look alike are both restored.
#[derive(Default)]
struct Existing {
    items: HashSet<ItemKey>,
    folders: HashMap<String, String>,
}

/// Creates folders, items and attachments from a snapshot.
pub struct RestoreEngine {
    client: BwClient,
    policy: DuplicatePolicy,
    attachment_delay: Duration,
}

impl RestoreEngine {
    /// Create an engine; `attachment_delay` paces attachment uploads.
    pub fn new(client: BwClient, policy: DuplicatePolicy, attachment_delay: Duration) -> Self {
        Self {
            client,
            policy,
            attachment_delay,
        }
    }

    /// Restore `snapshot` into the vault behind `session`.
    ///
    /// # Postconditions
    /// - Every folder with an id, item and attachment reference has exactly
    ///   one report entry
    ///
    /// # Errors
    /// - Listing the target vault fails under `SkipExisting`
    /// - The staging directory cannot be created
    ///
    /// Failures of individual entries, including a session that expires
    /// mid-run, are recorded in the report, not returned.
    pub async fn restore(
        &self,
        snapshot: &VaultSnapshot,
        session: &Session,
    ) -> Result<RestoreReport> {
        let existing = match self.policy {
            DuplicatePolicy::CreateAll => Existing::default(),
            DuplicatePolicy::SkipExisting => self.load_existing(session).await?,
        };
        let staging = tempfile::tempdir()?;
        let mut throttle = Throttle::new(self.attachment_delay);
        let mut report = RestoreReport::default();

        let folder_ids = self
            .restore_folders(snapshot, session, &existing, &mut report)
            .await;

        for item in &snapshot.items {
            if existing.items.contains(&item_key(item)) {
                report.record(
                    EntryKind::Item,
                    &item.name,
                    RestoreStatus::Skipped {
                        reason: "already exists".to_string(),
                    },
                );
                skip_attachments(item, "item skipped", &mut report);
                continue;
            }

            let created = match item_payload(item, &folder_ids) {
                Ok(payload) => self.client.create_item(session, &payload).await,
                Err(err) => Err(err),
            };
            match created {
                Ok(new_id) => {
                    report.record(
                        EntryKind::Item,
                        &item.name,
                        RestoreStatus::Created {
                            id: Some(new_id.clone()),
                        },
                    );
                    for attachment in &item.attachments {
                        let status = self
                            .restore_attachment(
                                snapshot,
                                session,
                                item,
                                &new_id,
                                attachment,
                                staging.path(),
                                &mut throttle,
                            )
                            .await;
                        report.record(
                            EntryKind::Attachment,
                            attachment_label(item, attachment),
                            status,
                        );
                    }
                }
                Err(err) => {
                    report.record(
                        EntryKind::Item,
                        &item.name,
                        RestoreStatus::Failed {
                            reason: err.to_string(),
                        },
                    );
                    skip_attachments(item, "item not restored", &mut report);
                }
            }
        }

        info!(
            "Restore finished: {} created, {} skipped, {} failed",
            report.created(),
            report.skipped(),
            report.failed()
        );
        Ok(report)
    }

    async fn load_existing(&self, session: &Session) -> Result<Existing> {
        let items = self.client.list_items(session).await?;
        let folders = self.client.list_folders(session).await?;
        debug!(
            "Target vault holds {} items, {} folders",
            items.len(),
            folders.len()
        );
        Ok(Existing {
            items: items.iter().map(item_key).collect(),
            folders: folders
                .into_iter()
                .filter_map(|f| f.id.map(|id| (f.name, id)))
                .collect(),
        })
    }

    /// Returns the old -> new folder id mapping.
    async fn restore_folders(
        &self,
        snapshot: &VaultSnapshot,
        session: &Session,
        existing: &Existing,
        report: &mut RestoreReport,
    ) -> HashMap<String, String> {
        let mut mapping = HashMap::new();

        for folder in &snapshot.folders {
            // The tool's synthetic "No Folder" entry has no id.
            let Some(old_id) = &folder.id else {
                continue;
            };

            if let Some(id) = existing.folders.get(&folder.name) {
                mapping.insert(old_id.clone(), id.clone());
                report.record(
                    EntryKind::Folder,
                    &folder.name,
                    RestoreStatus::Skipped {
                        reason: "reusing existing folder".to_string(),
                    },
                );
                continue;
            }

            match self
                .client
                .create_folder(session, &json!({ "name": folder.name }))
                .await
            {
                Ok(new_id) => {
                    mapping.insert(old_id.clone(), new_id.clone());
                    report.record(
                        EntryKind::Folder,
                        &folder.name,
                        RestoreStatus::Created { id: Some(new_id) },
                    );
                }
                Err(err) => report.record(
                    EntryKind::Folder,
                    &folder.name,
                    RestoreStatus::Failed {
                        reason: err.to_string(),
                    },
                ),
            }
        }

        mapping
    }

    #[allow(clippy::too_many_arguments)]
    async fn restore_attachment(
        &self,
        snapshot: &VaultSnapshot,
        session: &Session,
        item: &VaultItem,
        new_item_id: &str,
        attachment: &AttachmentRef,
        staging: &Path,
        throttle: &mut Throttle,
    ) -> RestoreStatus {
        let Some(blob) = snapshot.blob(&item.id, &attachment.id) else {
            return RestoreStatus::Failed {
                reason: "attachment bytes missing from backup".to_string(),
            };
        };

        let staged = stage_file(
            staging,
            &item.id,
            &attachment.id,
            &blob.file_name,
            blob.data(),
        )
        .await;
        let file = match staged {
            Ok(file) => file,
            Err(err) => {
                return RestoreStatus::Failed {
                    reason: err.to_string(),
                }
            }
        };

        let result = throttle
            .run(self.client.create_attachment(session, new_item_id, &file))
            .await;
        let _ = tokio::fs::remove_file(&file).await;

        match result {
            Ok(()) => RestoreStatus::Created { id: None },
            Err(err) => RestoreStatus::Failed {
                reason: err.to_string(),
            },
        }
    }
}

/// Build the create payload: server fields removed, folder re-pointed.
fn item_payload(item: &VaultItem, folder_ids: &HashMap<String, String>) -> Result<Value> {
    let mut payload = serde_json::to_value(item).map_err(|e| Error::Serialization(e.to_string()))?;
    if let Some(fields) = payload.as_object_mut() {
        for field in SERVER_FIELDS {
            fields.remove(*field);
        }
        let folder = item
            .folder_id
            .as_ref()
            .and_then(|old| folder_ids.get(old))
            .map(|new| Value::String(new.clone()))
            .unwrap_or(Value::Null);
        fields.insert("folderId".to_string(), folder);
    }
    Ok(payload)
}

fn skip_attachments(item: &VaultItem, reason: &str, report: &mut RestoreReport) {
    for attachment in &item.attachments {
        report.record(
            EntryKind::Attachment,
            attachment_label(item, attachment),
            RestoreStatus::Skipped {
                reason: reason.to_string(),
            },
        );
    }
}

fn attachment_label(item: &VaultItem, attachment: &AttachmentRef) -> String {
    format!("{}/{}", item.name, attachment.file_name)
}

/// Write attachment bytes under their original file name, since the tool
/// names the uploaded attachment after the file.
async fn stage_file(
    staging: &Path,
    item_id: &str,
    attachment_id: &str,
    file_name: &str,
    data: &[u8],
) -> Result<PathBuf> {
    let dir = staging.join(format!("{}-{}", item_id, attachment_id));
    tokio::fs::create_dir_all(&dir).await?;
    let path = dir.join(safe_file_name(file_name));
    tokio::fs::write(&path, data).await?;
    Ok(path)
}

/// Last path component of `name`, or a fixed fallback.
pub(crate) fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or("attachment")
        .to_string()
}
