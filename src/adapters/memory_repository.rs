//! In-memory repositories
//!
//! DashMap-backed implementations of the persistence ports for tests and
//! ephemeral runs. Fingerprint uniqueness comes from the map's entry API,
//! which holds the shard lock across the check and the insert.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::domain::model::{CalculationFingerprint, CalculationRecord, ComputationId, ComputationSet};
use crate::domain::ports::{CalculationRepository, Commit, ComputationRepository};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryCalculationRepository {
    records: DashMap<CalculationFingerprint, CalculationRecord>,
}

impl MemoryCalculationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalculationRepository for MemoryCalculationRepository {
    async fn find(&self, fingerprint: &CalculationFingerprint) -> Result<Option<CalculationRecord>> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    async fn insert_if_absent(&self, record: CalculationRecord) -> Result<Commit> {
        match self.records.entry(record.fingerprint.clone()) {
            Entry::Occupied(existing) => Ok(Commit::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(Commit::Inserted(record))
            }
        }
    }

    async fn remove(&self, fingerprint: &CalculationFingerprint) -> Result<bool> {
        Ok(self.records.remove(fingerprint).is_some())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

#[derive(Debug, Default)]
pub struct MemoryComputationRepository {
    sets: DashMap<ComputationId, ComputationSet>,
}

impl MemoryComputationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ComputationRepository for MemoryComputationRepository {
    async fn save(&self, set: &ComputationSet) -> Result<()> {
        self.sets.insert(set.id, set.clone());
        Ok(())
    }

    async fn get(&self, id: &ComputationId) -> Result<Option<ComputationSet>> {
        Ok(self.sets.get(id).map(|s| s.value().clone()))
    }

    async fn delete(&self, id: &ComputationId) -> Result<bool> {
        Ok(self.sets.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<ComputationSet>> {
        Ok(self.sets.iter().map(|s| s.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{CalculationConfig, Charges, ContentHash, OwnerScope, ReadOptions};
    use std::sync::Arc;

    fn fingerprint() -> CalculationFingerprint {
        CalculationFingerprint::new(
            ContentHash::parse(&"d".repeat(64)).unwrap(),
            CalculationConfig::parameterless("eem"),
            ReadOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_concurrent_inserts_commit_once() {
        let repo = Arc::new(MemoryCalculationRepository::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                let charges = Charges::from([("m".to_string(), vec![i as f64])]);
                repo.insert_if_absent(CalculationRecord::new(fingerprint(), "f.sdf", charges))
                    .await
                    .unwrap()
            }));
        }

        let mut inserted = 0;
        let mut canonical = None;
        for handle in handles {
            let commit = handle.await.unwrap();
            if commit.is_inserted() {
                inserted += 1;
                canonical = Some(commit.record().id);
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.find(&fingerprint()).await.unwrap().map(|r| r.id), canonical);
    }

    #[tokio::test]
    async fn test_computation_crud() {
        let repo = MemoryComputationRepository::new();
        let set = ComputationSet::new(OwnerScope::Guest, vec![], ReadOptions::default());

        repo.save(&set).await.unwrap();
        assert_eq!(repo.get(&set.id).await.unwrap(), Some(set.clone()));
        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(repo.delete(&set.id).await.unwrap());
        assert!(!repo.delete(&set.id).await.unwrap());
    }
}
