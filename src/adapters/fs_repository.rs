//! JSON-file repositories
//!
//! One file per record under the storage root's `db/` directory.
//!
//! Calculation records are named by fingerprint digest. A record is written
//! in full to a temporary file, then hard-linked to its final name; the link
//! fails with `AlreadyExists` when another writer got there first, which
//! makes the filesystem the uniqueness constraint.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::domain::model::{CalculationFingerprint, CalculationRecord, ComputationId, ComputationSet};
use crate::domain::ports::{CalculationRepository, Commit, ComputationRepository};
use crate::error::Result;

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FsCalculationRepository {
    dir: PathBuf,
}

impl FsCalculationRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, fingerprint: &CalculationFingerprint) -> PathBuf {
        self.dir.join(format!("{}.{}", fingerprint.digest(), EXTENSION))
    }
}

#[async_trait]
impl CalculationRepository for FsCalculationRepository {
    async fn find(&self, fingerprint: &CalculationFingerprint) -> Result<Option<CalculationRecord>> {
        let path = self.path(fingerprint);
        tokio::task::spawn_blocking(move || read_json(&path)).await?
    }

    async fn insert_if_absent(&self, record: CalculationRecord) -> Result<Commit> {
        let dir = self.dir.clone();
        let target = self.path(&record.fingerprint);
        tokio::task::spawn_blocking(move || -> Result<Commit> {
            let tmp = write_tmp(&dir, &record)?;
            let linked = std::fs::hard_link(&tmp, &target);
            std::fs::remove_file(&tmp)?;
            match linked {
                Ok(()) => Ok(Commit::Inserted(record)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(path = %target.display(), "Calculation record already committed");
                    match read_json::<CalculationRecord>(&target)? {
                        Some(existing) => Ok(Commit::Existing(existing)),
                        // Removed between the link attempt and the read.
                        None => Ok(Commit::Existing(record)),
                    }
                }
                Err(e) => Err(e.into()),
            }
        })
        .await?
    }

    async fn remove(&self, fingerprint: &CalculationFingerprint) -> Result<bool> {
        let path = self.path(fingerprint);
        tokio::task::spawn_blocking(move || remove_file(&path)).await?
    }

    async fn count(&self) -> Result<usize> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<usize> { Ok(json_files(&dir)?.len()) }).await?
    }
}

#[derive(Debug, Clone)]
pub struct FsComputationRepository {
    dir: PathBuf,
}

impl FsComputationRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: &ComputationId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }
}

#[async_trait]
impl ComputationRepository for FsComputationRepository {
    async fn save(&self, set: &ComputationSet) -> Result<()> {
        let dir = self.dir.clone();
        let target = self.path(&set.id);
        let set = set.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let tmp = write_tmp(&dir, &set)?;
            std::fs::rename(&tmp, &target)?;
            Ok(())
        })
        .await?
    }

    async fn get(&self, id: &ComputationId) -> Result<Option<ComputationSet>> {
        let path = self.path(id);
        tokio::task::spawn_blocking(move || read_json(&path)).await?
    }

    async fn delete(&self, id: &ComputationId) -> Result<bool> {
        let path = self.path(id);
        tokio::task::spawn_blocking(move || remove_file(&path)).await?
    }

    async fn list(&self) -> Result<Vec<ComputationSet>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ComputationSet>> {
            let mut sets = Vec::new();
            for path in json_files(&dir)? {
                if let Some(set) = read_json(&path)? {
                    sets.push(set);
                }
            }
            Ok(sets)
        })
        .await?
    }
}

fn write_tmp<T: Serialize>(dir: &Path, value: &T) -> Result<PathBuf> {
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    let bytes = serde_json::to_vec(value)?;
    let written = std::fs::write(&tmp, bytes).and_then(|_| std::fs::File::open(&tmp)?.sync_all());
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(tmp)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_file(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
            files.push(path);
        }
    }
    Ok(files)
}
