//! Blob storage for raw document bytes.
//!
//! Uploaded files and derived artifacts (extracted text) live in the blob
//! store under deterministic keys; document metadata only carries the key.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::StorageError;

/// Key-addressed byte storage.
///
/// Production uses the filesystem; tests swap in the in-memory store.
pub trait BlobStore: Send + Sync {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    /// Remove a blob. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Deterministic blob key for an uploaded document.
/// Components are sanitized so the key is safe as a relative path.
pub fn blob_key(owner_id: &str, document_id: &str, file_name: &str) -> String {
    format!(
        "{}/{}/{}",
        sanitize_component(owner_id),
        sanitize_component(document_id),
        sanitize_component(file_name)
    )
}

/// Key for the extracted-text artifact derived from a document
pub fn extracted_text_key(owner_id: &str, document_id: &str) -> String {
    format!(
        "{}/{}/extracted.txt",
        sanitize_component(owner_id),
        sanitize_component(document_id)
    )
}

/// Compute SHA-256 hash of a byte slice, returning a hex string.
/// Used for upload duplicate detection.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

fn sanitize_component(component: &str) -> String {
    let mapped: String = component
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();

    // ".." must never survive into a path component
    let sanitized = mapped
        .replace("..", "__")
        .trim_matches('.')
        .trim_matches('_')
        .to_string();

    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

/// Filesystem-backed blob store rooted under the data directory
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&root).map_err(StorageError::Io)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }
        std::fs::write(&path, bytes).map_err(StorageError::Io)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// In-memory blob store for tests
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_key_is_deterministic() {
        let a = blob_key("user-1", "doc-1", "syllabus.pdf");
        let b = blob_key("user-1", "doc-1", "syllabus.pdf");
        assert_eq!(a, b);
        assert_eq!(a, "user-1/doc-1/syllabus.pdf");
    }

    #[test]
    fn test_blob_key_sanitizes_traversal() {
        let key = blob_key("user-1", "doc-1", "../../etc/passwd");
        assert!(!key.contains(".."));
        assert!(!key.contains("/etc/"));
    }

    #[test]
    fn test_compute_content_hash() {
        let hash = compute_content_hash(b"hello world");
        // SHA-256 of "hello world"
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_fs_blob_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf()).unwrap();

        let key = blob_key("owner", "doc", "file.txt");
        store.put(&key, b"contents").unwrap();
        assert_eq!(store.get(&key).unwrap(), b"contents");

        store.delete(&key).unwrap();
        assert!(matches!(
            store.get(&key),
            Err(StorageError::NotFound { .. })
        ));
        // Deleting again is fine
        store.delete(&key).unwrap();
    }

    #[test]
    fn test_memory_blob_store_round_trip() {
        let store = MemoryBlobStore::new();
        store.put("a/b/c", b"data").unwrap();
        assert_eq!(store.get("a/b/c").unwrap(), b"data");
        store.delete("a/b/c").unwrap();
        assert!(store.get("a/b/c").is_err());
    }
}
