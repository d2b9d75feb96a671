//! Local-disk object store for selfie uploads.
//!
//! Clients get a short-lived signed PUT link from [`LocalMediaStore::presign_upload`]
//! and PUT the bytes to `/uploads/{key}`; objects live at `{dir}/{key}`.

pub mod signing;

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_exchange::keys;
use tandem_exchange::ports::{MediaStore, UploadTicket};

pub use signing::{UploadRejected, UrlSigner};
pub use tandem_exchange::keys::SELFIE_PREFIX;

/// What a finished upload looks like on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    /// Lowercase hex SHA-256 of the stored bytes.
    pub content_hash: String,
    pub size: u64,
}

pub struct LocalMediaStore {
    dir: PathBuf,
    public_url: String,
    signer: UrlSigner,
    upload_ttl: Duration,
}

impl LocalMediaStore {
    pub async fn new(
        dir: PathBuf,
        public_url: &str,
        secret: &[u8],
        upload_ttl: Duration,
    ) -> Result<Self> {
        fs::create_dir_all(dir.join(SELFIE_PREFIX)).await?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
            signer: UrlSigner::new(secret)?,
            upload_ttl,
        })
    }

    /// Resolve a key to a path inside the storage directory.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, UploadRejected> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }

    /// Check a signed upload link, as produced by `presign_upload`.
    pub fn verify_upload(&self, key: &str, expires: i64, signature: &str) -> Result<(), UploadRejected> {
        validate_key(key)?;
        self.signer.verify(key, expires, signature, Utc::now().timestamp())
    }

    /// Write an uploaded object and hash it. Each key is written once: a
    /// second upload to the same key fails with [`UploadRejected::AlreadyExists`].
    /// The file only appears once fully written.
    pub async fn store_upload(&self, key: &str, data: &[u8]) -> Result<StoredObject> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension(format!("part-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);

        // hard_link never replaces an existing file, unlike rename.
        let linked = fs::hard_link(&tmp, &path).await;
        if let Err(e) = fs::remove_file(&tmp).await {
            warn!("Failed to remove temp upload {}: {}", tmp.display(), e);
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(UploadRejected::AlreadyExists(key.to_string()).into());
            }
            Err(e) => return Err(e.into()),
        }

        let content_hash = keys::content_hash(data);
        debug!("Stored {} ({} bytes, sha256 {})", key, data.len(), content_hash);

        Ok(StoredObject {
            key: key.to_string(),
            content_hash,
            size: data.len() as u64,
        })
    }

    fn upload_url(&self, key: &str, expires: i64) -> String {
        format!(
            "{}/uploads/{}?expires={}&signature={}",
            self.public_url,
            key,
            expires,
            self.signer.sign(key, expires)
        )
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn presign_upload(&self, owner: Uuid) -> Result<UploadTicket> {
        let key = keys::new_selfie_key(owner);
        let expires = Utc::now().timestamp() + self.upload_ttl.as_secs() as i64;
        Ok(UploadTicket {
            upload_url: self.upload_url(&key, expires),
            key,
        })
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => bail!("Object {} not found", key),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted media object {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Media object {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Keys are relative, `/`-separated paths of plain names.
pub fn validate_key(key: &str) -> Result<(), UploadRejected> {
    let bad = || UploadRejected::BadKey(key.to_string());
    if key.is_empty() || key.len() > 256 || key.contains('\\') {
        return Err(bad());
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/');
    if !key.chars().all(allowed) {
        return Err(bad());
    }
    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => {}
            _ => return Err(bad()),
        }
    }
    if key.split('/').any(|segment| segment.is_empty() || segment.starts_with('.')) {
        return Err(bad());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    async fn store(dir: &Path) -> LocalMediaStore {
        LocalMediaStore::new(
            dir.to_path_buf(),
            "http://media.test/",
            b"test-secret",
            Duration::from_secs(900),
        )
        .await
        .unwrap()
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
            .unwrap_or("")
    }

    #[tokio::test]
    async fn presigned_link_accepts_upload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;

        let owner = Uuid::new_v4();
        let ticket = store.presign_upload(owner).await.unwrap();
        assert!(keys::is_owned_by(&ticket.key, owner));
        assert!(ticket.upload_url.starts_with(&format!("http://media.test/uploads/{}?", ticket.key)));

        let expires: i64 = query_param(&ticket.upload_url, "expires").parse().unwrap();
        let signature = query_param(&ticket.upload_url, "signature");
        store.verify_upload(&ticket.key, expires, signature).unwrap();

        let stored = store.store_upload(&ticket.key, b"jpeg bytes").await.unwrap();
        assert_eq!(stored.size, 10);
        assert_eq!(
            stored.content_hash,
            hex::encode(Sha256::digest(b"jpeg bytes"))
        );
        assert_eq!(store.download(&ticket.key).await.unwrap(), Bytes::from_static(b"jpeg bytes"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        store.store_upload("selfies/x.jpg", b"1").await.unwrap();

        store.delete("selfies/x.jpg").await.unwrap();
        store.delete("selfies/x.jpg").await.unwrap();
        assert!(store.download("selfies/x.jpg").await.is_err());
    }

    #[tokio::test]
    async fn stored_objects_are_never_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        store.store_upload("selfies/x.jpg", b"first").await.unwrap();

        let err = store.store_upload("selfies/x.jpg", b"second").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<UploadRejected>(),
            Some(&UploadRejected::AlreadyExists("selfies/x.jpg".into()))
        );
        assert_eq!(store.download("selfies/x.jpg").await.unwrap(), Bytes::from_static(b"first"));

        let mut entries = fs::read_dir(tmp.path().join("selfies")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name());
        }
        assert_eq!(names, vec!["x.jpg"]);
    }

    #[test]
    fn keys_cannot_escape_storage() {
        for key in ["../etc/passwd", "/abs.jpg", "selfies/../../x", "selfies//x", "a\\b", "selfies/.hidden", ""] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
        assert!(validate_key("selfies/0b9c-11.jpg").is_ok());
        assert!(validate_key(&keys::new_selfie_key(Uuid::new_v4())).is_ok());
    }
}
