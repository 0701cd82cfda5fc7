//! Content-addressed blob store: files named by the SHA-256 of their bytes.

use std::path::PathBuf;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

/// Lowercase hex SHA-256 of `bytes`, as used for entry names on disk.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// True iff `s` could name a store entry: 64 hex digits, either case.
pub fn is_content_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[derive(Clone, Debug)]
pub struct ContentStore {
    dir: PathBuf,
}

impl ContentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        ContentStore { dir: dir.into() }
    }

    /// Store `bytes` and return their hash. An entry that already exists is
    /// left untouched, which also makes concurrent writers safe: any two
    /// writers of the same name write identical bytes.
    pub async fn put(&self, bytes: &[u8]) -> Result<String> {
        let hash = content_hash(bytes);
        let path = self.dir.join(&hash);
        if fs::try_exists(&path).await? {
            return Ok(hash);
        }
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("stored {} bytes as {hash}", bytes.len());
        Ok(hash)
    }

    /// Fetch the entry named `hash`, or `None` when the hash is malformed or
    /// the entry does not exist.
    pub async fn get(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        if !is_content_hash(hash) {
            return Ok(None);
        }
        match fs::read(self.dir.join(hash.to_lowercase())).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has(&self, hash: &str) -> bool {
        is_content_hash(hash)
            && fs::try_exists(self.dir.join(hash.to_lowercase()))
                .await
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::{content_hash, is_content_hash, ContentStore};

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        let hash = store.put(b"ping").await.unwrap();
        assert_eq!(hash, content_hash(b"ping"));
        assert_eq!(store.get(&hash).await.unwrap().unwrap(), b"ping");
        assert!(store.has(&hash).await);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        let first = store.put(b"same bytes").await.unwrap();
        let second = store.put(b"same bytes").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.get(&first).await.unwrap().unwrap(), b"same bytes");
    }

    #[tokio::test]
    async fn get_accepts_uppercase_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        let hash = store.put(b"shouty").await.unwrap();
        let upper = hash.to_uppercase();
        assert_eq!(store.get(&upper).await.unwrap().unwrap(), b"shouty");
        assert!(store.has(&upper).await);
    }

    #[tokio::test]
    async fn get_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        assert!(store.get("not-a-hash").await.unwrap().is_none());
        assert!(store.get("../../etc/passwd").await.unwrap().is_none());
        assert!(store.get(&content_hash(b"missing")).await.unwrap().is_none());
    }

    #[test]
    fn hash_name_shape() {
        assert!(is_content_hash(&content_hash(b"")));
        assert!(is_content_hash(&content_hash(b"x").to_uppercase()));
        assert!(!is_content_hash(""));
        assert!(!is_content_hash(&"a".repeat(63)));
        assert!(!is_content_hash(&"g".repeat(64)));
    }
}
