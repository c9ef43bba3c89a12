//! Fingerprint-keyed calculation cache
//!
//! Sits in front of a [`CalculationRepository`]. The repository enforces
//! one record per fingerprint; this layer splits requested work into cached
//! and to-compute halves and turns lost insert races into the canonical
//! record.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use super::metrics::CacheMetrics;
use crate::domain::model::{
    CalculationConfig, CalculationFingerprint, CalculationRecord, Charges, ContentHash,
};
use crate::domain::ports::{CalculationRepository, Commit};
use crate::error::Result;

/// Requested fingerprints split by whether a record already exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub to_compute: BTreeMap<CalculationConfig, Vec<ContentHash>>,
    pub cached: BTreeMap<CalculationConfig, Vec<CalculationRecord>>,
}

impl Partition {
    pub fn compute_count(&self) -> usize {
        self.to_compute.values().map(Vec::len).sum()
    }

    pub fn cached_count(&self) -> usize {
        self.cached.values().map(Vec::len).sum()
    }

    pub fn is_fully_cached(&self) -> bool {
        self.to_compute.is_empty()
    }
}

pub struct CalculationCache {
    repository: Arc<dyn CalculationRepository>,
    metrics: Arc<CacheMetrics>,
}

impl CalculationCache {
    pub fn new(repository: Arc<dyn CalculationRepository>) -> Self {
        Self {
            repository,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Split fingerprints into cached records and content hashes still to
    /// compute, grouped by config. Repeated fingerprints are looked up once.
    #[instrument(skip_all, fields(requested = fingerprints.len()))]
    pub async fn partition(&self, fingerprints: &[CalculationFingerprint]) -> Result<Partition> {
        let mut partition = Partition::default();
        let mut seen = HashSet::new();

        for fingerprint in fingerprints {
            if !seen.insert(fingerprint) {
                continue;
            }
            match self.repository.find(fingerprint).await? {
                Some(record) => {
                    self.metrics.record_hit();
                    partition
                        .cached
                        .entry(fingerprint.config.clone())
                        .or_default()
                        .push(record);
                }
                None => {
                    self.metrics.record_miss();
                    partition
                        .to_compute
                        .entry(fingerprint.config.clone())
                        .or_default()
                        .push(fingerprint.content_hash.clone());
                }
            }
        }

        debug!(
            cached = partition.cached_count(),
            to_compute = partition.compute_count(),
            "Partitioned calculations"
        );
        Ok(partition)
    }

    pub async fn lookup(&self, fingerprint: &CalculationFingerprint) -> Result<Option<CalculationRecord>> {
        self.repository.find(fingerprint).await
    }

    /// Store freshly computed charges and return the canonical record.
    ///
    /// When another caller committed the same fingerprint first, its record
    /// wins and the charges passed here are discarded.
    pub async fn commit(
        &self,
        fingerprint: CalculationFingerprint,
        file_name: &str,
        charges: Charges,
    ) -> Result<CalculationRecord> {
        let record = CalculationRecord::new(fingerprint, file_name, charges);
        match self.repository.insert_if_absent(record).await? {
            Commit::Inserted(record) => {
                self.metrics.record_stored();
                Ok(record)
            }
            Commit::Existing(record) => {
                self.metrics.record_duplicate();
                debug!(record = %record.id, "Discarded duplicate calculation, keeping first commit");
                Ok(record)
            }
        }
    }

    /// Remove records. Returns how many existed.
    pub async fn release(&self, fingerprints: &[CalculationFingerprint]) -> Result<usize> {
        let mut removed = 0;
        for fingerprint in fingerprints {
            if self.repository.remove(fingerprint).await? {
                removed += 1;
            }
        }
        self.metrics.record_released(removed as u64);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryCalculationRepository;
    use crate::domain::model::{fingerprints_for, ReadOptions};

    fn hash(c: char) -> ContentHash {
        ContentHash::parse(&c.to_string().repeat(64)).unwrap()
    }

    fn charges(value: f64) -> Charges {
        Charges::from([("mol".to_string(), vec![value])])
    }

    fn cache() -> CalculationCache {
        CalculationCache::new(Arc::new(MemoryCalculationRepository::new()))
    }

    #[tokio::test]
    async fn test_partition_splits_by_existing_records() {
        let cache = cache();
        let eem = CalculationConfig::parameterless("eem");
        let fps = fingerprints_for(&[hash('a'), hash('b')], &[eem.clone()], ReadOptions::default());

        cache.commit(fps[0].clone(), "a.sdf", charges(0.1)).await.unwrap();

        let partition = cache.partition(&fps).await.unwrap();
        assert_eq!(partition.cached[&eem].len(), 1);
        assert_eq!(partition.to_compute[&eem], vec![hash('b')]);
        assert!(!partition.is_fully_cached());
        assert_eq!(cache.metrics().hits(), 1);
        assert_eq!(cache.metrics().misses(), 1);
    }

    #[tokio::test]
    async fn test_partition_collapses_repeated_fingerprints() {
        let cache = cache();
        let eem = CalculationConfig::parameterless("eem");
        let fps = fingerprints_for(&[hash('a'), hash('a')], &[eem.clone()], ReadOptions::default());

        let partition = cache.partition(&fps).await.unwrap();
        assert_eq!(partition.compute_count(), 1);
    }

    #[tokio::test]
    async fn test_first_commit_wins() {
        let cache = cache();
        let fp = CalculationFingerprint::new(
            hash('a'),
            CalculationConfig::parameterless("eem"),
            ReadOptions::default(),
        );

        let first = cache.commit(fp.clone(), "a.sdf", charges(1.0)).await.unwrap();
        let second = cache.commit(fp.clone(), "renamed.sdf", charges(2.0)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.charges, charges(1.0));
        assert_eq!(cache.metrics().snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_release_removes_records() {
        let cache = cache();
        let fp = CalculationFingerprint::new(
            hash('c'),
            CalculationConfig::with_parameters("qeq", "p"),
            ReadOptions::default(),
        );
        cache.commit(fp.clone(), "c.sdf", charges(0.0)).await.unwrap();

        assert_eq!(cache.release(&[fp.clone(), fp.clone()]).await.unwrap(), 1);
        assert!(cache.lookup(&fp).await.unwrap().is_none());
    }
}
