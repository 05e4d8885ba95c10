//! Backup file format.
//!
//! A backup is an 80-byte header followed by the XChaCha20-Poly1305
//! ciphertext of the JSON-serialized snapshot and its 16-byte tag:
//!
//! ```text
//! magic "PORTVLT\0" (8) | version u16 | kdf id u8 | cipher id u8
//! | memory KiB u32 | iterations u32 | lanes u32 | salt (32) | nonce (24)
//! | ciphertext || tag
//! ```
//!
//! Integers are little-endian. The header is authenticated as associated
//! data. The key is derived from the passphrase with Argon2id using the salt
//! and parameters stored in the header.

use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use portvault_common::{Error, Passphrase, Result, SensitiveBytes, VaultSnapshot};
use portvault_crypto::{
    decrypt, derive_key, encrypt, KdfParams, Nonce, Salt, NONCE_SIZE, SALT_LENGTH, TAG_SIZE,
};

/// File magic.
pub const MAGIC: &[u8; 8] = b"PORTVLT\0";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8 + 2 + 1 + 1 + 4 * 3 + SALT_LENGTH + NONCE_SIZE;

/// Conventional extension of backup files.
pub const BACKUP_EXTENSION: &str = "portvault";

const KDF_ARGON2ID: u8 = 1;
const CIPHER_XCHACHA20_POLY1305: u8 = 1;

/// Plaintext header of a backup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHeader {
    pub version: u16,
    pub kdf_params: KdfParams,
    pub salt: Salt,
    pub nonce: Nonce,
}

impl BackupHeader {
    fn fresh(kdf_params: KdfParams) -> Self {
        Self {
            version: FORMAT_VERSION,
            kdf_params,
            salt: Salt::generate(),
            nonce: Nonce::generate(),
        }
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..8].copy_from_slice(MAGIC);
        out[8..10].copy_from_slice(&self.version.to_le_bytes());
        out[10] = KDF_ARGON2ID;
        out[11] = CIPHER_XCHACHA20_POLY1305;
        out[12..16].copy_from_slice(&self.kdf_params.memory_cost.to_le_bytes());
        out[16..20].copy_from_slice(&self.kdf_params.time_cost.to_le_bytes());
        out[20..24].copy_from_slice(&self.kdf_params.parallelism.to_le_bytes());
        out[24..24 + SALT_LENGTH].copy_from_slice(self.salt.as_bytes());
        out[24 + SALT_LENGTH..].copy_from_slice(self.nonce.as_bytes());
        out
    }

    /// Parse and sanity-check a header.
    ///
    /// # Errors
    /// - `UnsupportedFormat` if the magic is wrong or the version is not readable
    /// - `WrongPassphraseOrCorrupted` if the header is truncated or its
    ///   algorithm ids or KDF parameters are out of range
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() || &bytes[..MAGIC.len()] != MAGIC {
            return Err(Error::UnsupportedFormat(
                "not a portvault backup file".to_string(),
            ));
        }
        if bytes.len() < HEADER_LEN {
            return Err(Error::WrongPassphraseOrCorrupted);
        }

        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version == 0 || version > FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "format version {} (this build reads up to {})",
                version, FORMAT_VERSION
            )));
        }
        if bytes[10] != KDF_ARGON2ID || bytes[11] != CIPHER_XCHACHA20_POLY1305 {
            return Err(Error::WrongPassphraseOrCorrupted);
        }

        let kdf_params = KdfParams {
            memory_cost: read_u32(bytes, 12),
            time_cost: read_u32(bytes, 16),
            parallelism: read_u32(bytes, 20),
        };
        if kdf_params.validate().is_err() {
            return Err(Error::WrongPassphraseOrCorrupted);
        }

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(&bytes[24..24 + SALT_LENGTH]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&bytes[24 + SALT_LENGTH..HEADER_LEN]);

        Ok(Self {
            version,
            kdf_params,
            salt: Salt::from_bytes(salt),
            nonce: Nonce::from_bytes(nonce),
        })
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// The persisted backup artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBackup {
    pub header: BackupHeader,
    ciphertext: Vec<u8>,
}

impl EncryptedBackup {
    /// Ciphertext followed by the authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Serialize to the on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse the on-disk layout. Authentication happens in [`BackupCodec::decode`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = BackupHeader::parse(bytes)?;
        let ciphertext = &bytes[HEADER_LEN..];
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::WrongPassphraseOrCorrupted);
        }
        Ok(Self {
            header,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Encrypts snapshots into backups and back.
#[derive(Debug, Clone)]
pub struct BackupCodec {
    kdf_params: KdfParams,
}

impl BackupCodec {
    /// Create a codec deriving new keys with `kdf_params`.
    pub fn new(kdf_params: KdfParams) -> Self {
        Self { kdf_params }
    }

    /// Encrypt a snapshot.
    ///
    /// # Preconditions
    /// - Every attachment reference in `snapshot` resolves to exactly one blob
    ///
    /// # Postconditions
    /// - Fresh salt and nonce; decoding with the same passphrase yields `snapshot`
    ///
    /// # Errors
    /// - `IncompleteSnapshot` if the precondition does not hold
    /// - Key derivation or encryption failure
    pub fn encode(
        &self,
        snapshot: &VaultSnapshot,
        passphrase: &Passphrase,
    ) -> Result<EncryptedBackup> {
        snapshot.validate()?;

        let plaintext = SensitiveBytes::new(
            serde_json::to_vec(snapshot).map_err(|e| Error::Serialization(e.to_string()))?,
        );

        let header = BackupHeader::fresh(self.kdf_params);
        let key = derive_key(passphrase.as_bytes(), &header.salt, &header.kdf_params)?;
        let ciphertext = encrypt(
            &key,
            &header.nonce,
            plaintext.as_bytes(),
            &header.to_bytes(),
        )?;

        debug!(
            "Encoded snapshot: {} bytes plaintext, {} bytes ciphertext",
            plaintext.len(),
            ciphertext.len()
        );
        Ok(EncryptedBackup { header, ciphertext })
    }

    /// Decrypt a backup.
    ///
    /// Uses the KDF parameters stored in the backup, not the codec's own.
    ///
    /// # Errors
    /// - `WrongPassphraseOrCorrupted` if authentication fails; no plaintext is returned
    pub fn decode(
        &self,
        backup: &EncryptedBackup,
        passphrase: &Passphrase,
    ) -> Result<VaultSnapshot> {
        let header = &backup.header;
        let key = derive_key(passphrase.as_bytes(), &header.salt, &header.kdf_params)?;
        let plaintext = SensitiveBytes::new(decrypt(
            &key,
            &header.nonce,
            &backup.ciphertext,
            &header.to_bytes(),
        )?);

        serde_json::from_slice(plaintext.as_bytes())
            .map_err(|e| Error::Serialization(format!("backup contents unreadable: {}", e)))
    }
}

impl Default for BackupCodec {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

/// Write a backup atomically: the file appears complete or not at all.
pub async fn write_backup(path: &Path, backup: &EncryptedBackup) -> Result<()> {
    let bytes = backup.to_bytes();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::path::PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        info!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

/// Read a backup file and parse its header.
pub async fn read_backup(path: &Path) -> Result<EncryptedBackup> {
    let bytes = tokio::fs::read(path).await?;
    EncryptedBackup::from_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use portvault_common::{AttachmentBlob, VaultItem};
    use proptest::prelude::*;
    use serde_json::json;

    fn cheap_codec() -> BackupCodec {
        BackupCodec::new(KdfParams {
            memory_cost: 8,
            time_cost: 1,
            parallelism: 1,
        })
    }

    fn passphrase(s: &str) -> Passphrase {
        Passphrase::new(s).unwrap()
    }

    fn snapshot_with_attachment(bytes: Vec<u8>) -> VaultSnapshot {
        let item: VaultItem = serde_json::from_value(json!({
            "id": "item-1",
            "name": "Router",
            "type": 1,
            "login": { "username": "admin", "password": "pa55" },
            "attachments": [{ "id": "att-1", "fileName": "config.bin", "size": "10" }]
        }))
        .unwrap();
        let mut snapshot = VaultSnapshot::new(Vec::new(), vec![item]);
        snapshot
            .attachments
            .push(AttachmentBlob::new("item-1", "att-1", "config.bin", bytes));
        snapshot
    }

    #[test]
    fn test_example_scenario() {
        let snapshot = snapshot_with_attachment(b"0123456789".to_vec());
        let codec = cheap_codec();

        let backup = codec.encode(&snapshot, &passphrase("correct-horse")).unwrap();
        let bytes = backup.to_bytes();
        let parsed = EncryptedBackup::from_bytes(&bytes).unwrap();

        let decoded = codec.decode(&parsed, &passphrase("correct-horse")).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.items[0], snapshot.items[0]);
        assert_eq!(decoded.blob("item-1", "att-1").unwrap().data(), b"0123456789");

        assert!(matches!(
            codec.decode(&parsed, &passphrase("wrong")),
            Err(Error::WrongPassphraseOrCorrupted)
        ));
    }

    #[test]
    fn test_header_layout() {
        let snapshot = snapshot_with_attachment(vec![1, 2, 3]);
        let bytes = cheap_codec()
            .encode(&snapshot, &passphrase("pw"))
            .unwrap()
            .to_bytes();

        assert_eq!(HEADER_LEN, 80);
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), FORMAT_VERSION);
        assert_eq!(read_u32(&bytes, 12), 8);
        assert_eq!(read_u32(&bytes, 16), 1);
        assert_eq!(read_u32(&bytes, 20), 1);
    }

    #[test]
    fn test_fresh_salt_and_nonce_per_encode() {
        let snapshot = snapshot_with_attachment(vec![9; 4]);
        let codec = cheap_codec();
        let a = codec.encode(&snapshot, &passphrase("pw")).unwrap();
        let b = codec.encode(&snapshot, &passphrase("pw")).unwrap();

        assert_ne!(a.header.salt, b.header.salt);
        assert_ne!(a.header.nonce, b.header.nonce);
        assert_ne!(a.ciphertext(), b.ciphertext());
    }

    #[test]
    fn test_incomplete_snapshot_refused() {
        let mut snapshot = snapshot_with_attachment(vec![1]);
        snapshot.attachments.clear();

        assert!(matches!(
            cheap_codec().encode(&snapshot, &passphrase("pw")),
            Err(Error::IncompleteSnapshot(_))
        ));
    }

    #[test]
    fn test_every_single_byte_flip_fails() {
        let snapshot = snapshot_with_attachment(b"0123456789".to_vec());
        let codec = cheap_codec();
        let bytes = codec
            .encode(&snapshot, &passphrase("pw"))
            .unwrap()
            .to_bytes();

        // KDF parameter bytes are covered separately: a flip there can ask
        // for a very expensive derivation.
        for index in (0..bytes.len()).filter(|i| !(12..24).contains(i)) {
            let mut tampered = bytes.clone();
            tampered[index] ^= 0x01;
            let result = EncryptedBackup::from_bytes(&tampered)
                .and_then(|backup| codec.decode(&backup, &passphrase("pw")));
            assert!(result.is_err(), "flip at byte {} was accepted", index);
        }
    }

    #[test]
    fn test_tampered_kdf_params_fail() {
        let snapshot = snapshot_with_attachment(vec![5; 10]);
        let codec = cheap_codec();
        let mut bytes = codec
            .encode(&snapshot, &passphrase("pw"))
            .unwrap()
            .to_bytes();

        bytes[16] = 2; // iterations 1 -> 2
        let backup = EncryptedBackup::from_bytes(&bytes).unwrap();
        assert!(matches!(
            codec.decode(&backup, &passphrase("pw")),
            Err(Error::WrongPassphraseOrCorrupted)
        ));

        bytes[16] = 0;
        assert!(matches!(
            EncryptedBackup::from_bytes(&bytes),
            Err(Error::WrongPassphraseOrCorrupted)
        ));
    }

    #[test]
    fn test_foreign_and_future_files() {
        assert!(matches!(
            EncryptedBackup::from_bytes(b"PK\x03\x04 zip file"),
            Err(Error::UnsupportedFormat(_))
        ));

        let snapshot = snapshot_with_attachment(vec![]);
        let mut bytes = cheap_codec()
            .encode(&snapshot, &passphrase("pw"))
            .unwrap()
            .to_bytes();
        bytes[8] = 2;
        assert!(matches!(
            EncryptedBackup::from_bytes(&bytes),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_truncated_file() {
        let snapshot = snapshot_with_attachment(vec![1, 2]);
        let bytes = cheap_codec()
            .encode(&snapshot, &passphrase("pw"))
            .unwrap()
            .to_bytes();

        assert!(matches!(
            EncryptedBackup::from_bytes(&bytes[..40]),
            Err(Error::WrongPassphraseOrCorrupted)
        ));
        assert!(matches!(
            EncryptedBackup::from_bytes(&bytes[..HEADER_LEN + TAG_SIZE - 1]),
            Err(Error::WrongPassphraseOrCorrupted)
        ));
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.portvault");
        let snapshot = snapshot_with_attachment(vec![7; 32]);
        let codec = cheap_codec();

        let backup = codec.encode(&snapshot, &passphrase("pw")).unwrap();
        write_backup(&path, &backup).await.unwrap();

        let read = read_backup(&path).await.unwrap();
        assert_eq!(read, backup);
        assert_eq!(codec.decode(&read, &passphrase("pw")).unwrap(), snapshot);

        // No temporary files left next to the backup.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    fn arb_snapshot() -> impl Strategy<Value = VaultSnapshot> {
        prop::collection::vec(
            (
                "[a-zA-Z0-9 ]{0,16}",
                prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
            ),
            0..4,
        )
        .prop_map(|entries| {
            let mut items = Vec::new();
            let mut blobs = Vec::new();
            for (i, (name, attachment)) in entries.into_iter().enumerate() {
                let id = format!("item-{}", i);
                let mut item = json!({ "id": id, "name": name, "type": 2, "notes": name });
                if let Some(bytes) = attachment {
                    item["attachments"] = json!([{ "id": "a", "fileName": "f.bin" }]);
                    blobs.push(AttachmentBlob::new(id.clone(), "a", "f.bin", bytes));
                }
                items.push(serde_json::from_value(item).unwrap());
            }
            let mut snapshot = VaultSnapshot::new(Vec::new(), items);
            snapshot.attachments = blobs;
            snapshot
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_roundtrip(snapshot in arb_snapshot(), pw in "[ -~]{1,24}") {
            let codec = cheap_codec();
            let backup = codec.encode(&snapshot, &passphrase(&pw)).unwrap();
            let parsed = EncryptedBackup::from_bytes(&backup.to_bytes()).unwrap();
            prop_assert_eq!(codec.decode(&parsed, &passphrase(&pw)).unwrap(), snapshot);
        }

        #[test]
        fn prop_wrong_passphrase_fails(
            snapshot in arb_snapshot(),
            pw in "[a-z]{1,12}",
            other in "[a-z]{1,12}",
        ) {
            prop_assume!(pw != other);
            let codec = cheap_codec();
            let backup = codec.encode(&snapshot, &passphrase(&pw)).unwrap();
            prop_assert!(matches!(
                codec.decode(&backup, &passphrase(&other)),
                Err(Error::WrongPassphraseOrCorrupted)
            ));
        }

        #[test]
        fn prop_ciphertext_flip_fails(
            snapshot in arb_snapshot(),
            position in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let codec = cheap_codec();
            let mut bytes = codec.encode(&snapshot, &passphrase("pw")).unwrap().to_bytes();
            let index = HEADER_LEN + position.index(bytes.len() - HEADER_LEN);
            bytes[index] ^= mask;

            let backup = EncryptedBackup::from_bytes(&bytes).unwrap();
            prop_assert!(matches!(
                codec.decode(&backup, &passphrase("pw")),
                Err(Error::WrongPassphraseOrCorrupted)
            ));
        }
    }
}
