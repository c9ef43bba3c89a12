//! Content-addressed file store
//!
//! Files live in `<scope>/files/<hash>_<display name>`, where the hash is the
//! SHA-256 of the bytes after carriage returns are stripped. Storing bytes
//! already present in the scope reuses the existing entry.
//!
//! The store does not lock; callers that mix uploads with eviction hold the
//! scope guard from [`crate::quota::QuotaManager`].

use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::fs::{self as store_fs, EntryInfo};
use super::layout::StorageLayout;
use crate::domain::model::{ContentHash, OwnerScope, StoredFile};
use crate::error::{Error, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// Result of a `store` call.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOutcome {
    pub file: StoredFile,
    /// The bytes were already stored in the scope and the new copy was dropped
    pub deduplicated: bool,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    layout: StorageLayout,
}

impl ContentStore {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Hash and normalized length of `bytes`, without touching disk.
    pub fn digest(bytes: &[u8]) -> (ContentHash, u64) {
        let mut hasher = Sha256::new();
        let mut len = 0u64;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            let normalized = strip_cr(chunk);
            len += normalized.len() as u64;
            hasher.update(&normalized);
        }
        (ContentHash::from_digest(&hasher.finalize()), len)
    }

    /// Reject names that leave nothing usable once reduced to a file name.
    pub fn validate_name(display_name: &str) -> Result<()> {
        sanitize_name(display_name).map(|_| ())
    }

    /// Store `bytes` for `scope` under `display_name`.
    pub async fn store(
        &self,
        scope: &OwnerScope,
        bytes: Bytes,
        display_name: &str,
    ) -> Result<StoreOutcome> {
        let name = sanitize_name(display_name)?;
        let layout = self.layout.clone();
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || store_blocking(&layout, &scope, &bytes, &name))
            .await?
    }

    /// Path of a stored file.
    pub async fn resolve(&self, scope: &OwnerScope, hash: &ContentHash) -> Result<PathBuf> {
        self.stored_entry(scope, hash).await.map(|(entry, _)| entry.path)
    }

    /// Path and metadata of a stored file in one directory scan.
    pub async fn locate(&self, scope: &OwnerScope, hash: &ContentHash) -> Result<(PathBuf, StoredFile)> {
        self.stored_entry(scope, hash)
            .await
            .map(|(entry, file)| (entry.path, file))
    }

    pub async fn contains(&self, scope: &OwnerScope, hash: &ContentHash) -> Result<bool> {
        match self.stored_entry(scope, hash).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every file of the scope, oldest first.
    pub async fn listing(&self, scope: &OwnerScope) -> Result<Vec<StoredFile>> {
        let dir = self.layout.files_dir(scope);
        let scope = scope.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<StoredFile>> {
            let mut files: Vec<StoredFile> = list_stored(&dir)?
                .into_iter()
                .map(|(entry, hash, name)| to_stored_file(&scope, &entry, hash, name))
                .collect();
            files.sort_by(|a, b| {
                a.modified_at
                    .cmp(&b.modified_at)
                    .then_with(|| a.display_name.cmp(&b.display_name))
            });
            Ok(files)
        })
        .await?
    }

    /// Delete a stored file, returning what was removed.
    pub async fn delete(&self, scope: &OwnerScope, hash: &ContentHash) -> Result<StoredFile> {
        let (entry, file) = self.stored_entry(scope, hash).await?;
        tokio::task::spawn_blocking(move || store_fs::remove_path(&entry.path)).await??;
        debug!(scope = %file.owner_scope, hash = %file.content_hash, "Deleted stored file");
        Ok(file)
    }

    async fn stored_entry(
        &self,
        scope: &OwnerScope,
        hash: &ContentHash,
    ) -> Result<(EntryInfo, StoredFile)> {
        let dir = self.layout.files_dir(scope);
        let scope = scope.clone();
        let hash = hash.clone();
        tokio::task::spawn_blocking(move || -> Result<(EntryInfo, StoredFile)> {
            find_stored(&dir, &hash)?
                .map(|(entry, name)| {
                    let file = to_stored_file(&scope, &entry, hash.clone(), name);
                    (entry, file)
                })
                .ok_or_else(|| Error::not_found("file", &hash))
        })
        .await?
    }
}

/// Split `<hash>_<display name>`.
pub fn parse_stored_name(name: &str) -> Option<(ContentHash, &str)> {
    let (hash, display) = name.split_once('_')?;
    if display.is_empty() {
        return None;
    }
    ContentHash::parse(hash).ok().map(|hash| (hash, display))
}

fn strip_cr(chunk: &[u8]) -> Vec<u8> {
    chunk.iter().copied().filter(|&b| b != b'\r').collect()
}

/// Keep only the final path component and replace anything unusual.
fn sanitize_name(display_name: &str) -> Result<String> {
    let base = display_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let name: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        return Err(Error::Validation(format!(
            "invalid file name '{}'",
            display_name
        )));
    }
    Ok(name)
}

fn store_blocking(
    layout: &StorageLayout,
    scope: &OwnerScope,
    bytes: &[u8],
    name: &str,
) -> Result<StoreOutcome> {
    let tmp_dir = layout.tmp_dir();
    let files_dir = layout.files_dir(scope);
    std::fs::create_dir_all(&tmp_dir)?;
    std::fs::create_dir_all(&files_dir)?;

    let tmp_path = tmp_dir.join(format!("{}.upload", Uuid::new_v4()));
    let hash = match write_normalized(&tmp_path, bytes) {
        Ok(hash) => hash,
        Err(e) => {
            let _ = store_fs::remove_path(&tmp_path);
            return Err(e);
        }
    };

    if let Some((entry, existing_name)) = find_stored(&files_dir, &hash)? {
        store_fs::remove_path(&tmp_path)?;
        debug!(scope = %scope, hash = %hash, "Reusing stored file with identical content");
        return Ok(StoreOutcome {
            file: to_stored_file(scope, &entry, hash, existing_name),
            deduplicated: true,
        });
    }

    let target = files_dir.join(format!("{}_{}", hash, name));
    std::fs::rename(&tmp_path, &target)?;
    let entry = EntryInfo {
        size: store_fs::dir_size(&target)?,
        modified: store_fs::last_modified(&target)?,
        name: format!("{}_{}", hash, name),
        path: target,
    };
    debug!(scope = %scope, hash = %hash, size = entry.size, "Stored new file");
    Ok(StoreOutcome {
        file: to_stored_file(scope, &entry, hash, name.to_string()),
        deduplicated: false,
    })
}

fn write_normalized(path: &Path, bytes: &[u8]) -> Result<ContentHash> {
    let mut file = std::fs::File::create(path)?;
    let mut hasher = Sha256::new();
    for chunk in bytes.chunks(CHUNK_SIZE) {
        let normalized = strip_cr(chunk);
        hasher.update(&normalized);
        file.write_all(&normalized)?;
    }
    file.sync_all()?;
    Ok(ContentHash::from_digest(&hasher.finalize()))
}

fn list_stored(dir: &Path) -> Result<Vec<(EntryInfo, ContentHash, String)>> {
    Ok(store_fs::list_entries(dir)?
        .into_iter()
        .filter_map(|entry| {
            let (hash, display) = parse_stored_name(&entry.name)?;
            let display = display.to_string();
            Some((entry, hash, display))
        })
        .collect())
}

fn find_stored(dir: &Path, hash: &ContentHash) -> Result<Option<(EntryInfo, String)>> {
    Ok(list_stored(dir)?
        .into_iter()
        .find(|(_, h, _)| h == hash)
        .map(|(entry, _, name)| (entry, name)))
}

fn to_stored_file(scope: &OwnerScope, entry: &EntryInfo, hash: ContentHash, name: String) -> StoredFile {
    StoredFile {
        content_hash: hash,
        owner_scope: scope.clone(),
        display_name: name,
        size_bytes: entry.size,
        modified_at: entry.modified,
    }
}
