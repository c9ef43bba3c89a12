//! Charge Service
//!
//! The operations exposed to callers. Each one wires the content store,
//! quota manager, suitability resolver, calculation cache and executor
//! together for one owner scope.
//!
//! # Example
//!
//! ```ignore
//! let service = ChargeService::open(AppConfig::default(), Arc::new(ProcessEngine::new("chargefw2")))?;
//! let files = service.upload(&scope, vec![UploadFile::new("a.sdf", bytes)]).await?;
//! let id = service.setup(&scope, vec![files[0].content_hash.clone()], ReadOptions::default()).await?;
//! let results = service.calculate(&scope, &id, vec![]).await?;
//! ```

mod output;

pub use output::{charges_file_name, render_charges};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{FsCalculationRepository, FsComputationRepository, LoggingEventPublisher};
use crate::cache::{CacheMetricsSnapshot, CalculationCache};
use crate::config::AppConfig;
use crate::domain::events::DomainEvent;
use crate::domain::model::{
    fingerprints_for, CalculationConfig, CalculationFingerprint, CalculationPart, CalculationResult,
    ComputationId, ComputationInput, ComputationSet, ContentHash, OwnerScope, QuotaReport, ReadOptions,
    StoredFile, SuitableMethods,
};
use crate::domain::ports::{CalculationRepository, ChargeEngine, ComputationRepository, EventPublisher};
use crate::error::{Error, Result};
use crate::executor::{CalculationExecutor, CalculationJob, ExecutorMetricsSnapshot, WorkerPool};
use crate::quota::{QuotaManager, ScopeGuard};
use crate::store::{fs as store_fs, ContentStore, StorageLayout};
use crate::suitability::SuitabilityResolver;

/// One uploaded file: the client's name plus its raw bytes.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Point-in-time counters of the cache and the executor.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub cache: CacheMetricsSnapshot,
    pub executor: ExecutorMetricsSnapshot,
}

pub struct ChargeService {
    config: AppConfig,
    engine: Arc<dyn ChargeEngine>,
    layout: StorageLayout,
    store: ContentStore,
    quota: QuotaManager,
    resolver: SuitabilityResolver,
    cache: Arc<CalculationCache>,
    executor: CalculationExecutor,
    pool: Arc<WorkerPool>,
    computations: Arc<dyn ComputationRepository>,
    events: Arc<dyn EventPublisher>,
}

impl ChargeService {
    pub fn new(
        config: AppConfig,
        engine: Arc<dyn ChargeEngine>,
        calculations: Arc<dyn CalculationRepository>,
        computations: Arc<dyn ComputationRepository>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = StorageLayout::new(&config.storage.root);
        layout.ensure()?;

        let pool = Arc::new(WorkerPool::new(config.executor.worker_threads)?);
        let store = ContentStore::new(layout.clone());
        let cache = Arc::new(CalculationCache::new(calculations));
        let executor = CalculationExecutor::new(
            engine.clone(),
            store.clone(),
            cache.clone(),
            pool.clone(),
            config.executor.max_concurrent_calculations,
        );

        info!(
            root = %layout.root().display(),
            workers = pool.size(),
            max_concurrent = config.executor.max_concurrent_calculations,
            "Charge service ready"
        );

        Ok(Self {
            quota: QuotaManager::new(layout.clone(), config.quota.clone()),
            resolver: SuitabilityResolver::new(engine.clone(), pool.clone()),
            config,
            engine,
            layout,
            store,
            cache,
            executor,
            pool,
            computations,
            events,
        })
    }

    /// Service persisted under the configured storage root.
    pub fn open(config: AppConfig, engine: Arc<dyn ChargeEngine>) -> Result<Self> {
        let layout = StorageLayout::new(&config.storage.root);
        layout.ensure()?;
        let calculations = Arc::new(FsCalculationRepository::new(layout.calculations_db())?);
        let computations = Arc::new(FsComputationRepository::new(layout.computations_db())?);
        Self::new(
            config,
            engine,
            calculations,
            computations,
            Arc::new(LoggingEventPublisher::info_level()),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Store uploaded files, evicting old guest files when the pool is full.
    ///
    /// The whole upload is validated first; nothing is stored when any file
    /// is rejected.
    #[instrument(skip(self, files), fields(scope = %scope, files = files.len()))]
    pub async fn upload(&self, scope: &OwnerScope, files: Vec<UploadFile>) -> Result<Vec<StoredFile>> {
        self.validate_upload(&files)?;

        let guard = self.quota.lock_scope(scope).await;

        let mut protected = HashSet::new();
        let mut incoming = 0u64;
        for file in &files {
            let (hash, size) = ContentStore::digest(&file.bytes);
            if protected.contains(&hash) {
                continue;
            }
            if !self.store.contains(scope, &hash).await? {
                incoming += size;
            }
            protected.insert(hash);
        }

        let evicted = self.quota.ensure_headroom(&guard, incoming, &protected).await?;
        let mut events: Vec<DomainEvent> = evicted
            .iter()
            .map(|file| DomainEvent::file_evicted(scope, &file.content_hash, file.size_bytes))
            .collect();

        let mut stored = Vec::with_capacity(files.len());
        for file in files {
            let outcome = self.store.store(scope, file.bytes, &file.name).await?;
            events.push(DomainEvent::file_stored(
                scope,
                &outcome.file.content_hash,
                outcome.file.size_bytes,
                outcome.deduplicated,
            ));
            stored.push(outcome.file);
        }
        drop(guard);

        self.events.publish_all(events).await?;
        info!(stored = stored.len(), evicted = evicted.len(), incoming, "Upload finished");
        Ok(stored)
    }

    fn validate_upload(&self, files: &[UploadFile]) -> Result<()> {
        let limits = &self.config.limits;
        if files.is_empty() {
            return Err(Error::Validation("no files uploaded".into()));
        }

        let mut total = 0u64;
        for file in files {
            ContentStore::validate_name(&file.name)?;
            if !limits.extension_allowed(&file.name) {
                return Err(Error::Validation(format!(
                    "file '{}' has an unsupported extension",
                    file.name
                )));
            }
            let size = file.bytes.len() as u64;
            if size == 0 {
                return Err(Error::Validation(format!("file '{}' is empty", file.name)));
            }
            if size > limits.max_file_size {
                return Err(Error::Validation(format!(
                    "file '{}' is larger than {} bytes",
                    file.name, limits.max_file_size
                )));
            }
            total += size;
        }
        if total > limits.max_upload_size {
            return Err(Error::Validation(format!(
                "upload is larger than {} bytes",
                limits.max_upload_size
            )));
        }
        Ok(())
    }

    /// Files of the scope, oldest first.
    pub async fn list_files(&self, scope: &OwnerScope) -> Result<Vec<StoredFile>> {
        self.store.listing(scope).await
    }

    #[instrument(skip(self), fields(scope = %scope, hash = %hash))]
    pub async fn delete_file(&self, scope: &OwnerScope, hash: &ContentHash) -> Result<StoredFile> {
        let deleted = {
            let _guard = self.quota.lock_scope(scope).await;
            self.store.delete(scope, hash).await?
        };
        self.events.publish(DomainEvent::file_deleted(scope, hash)).await?;
        Ok(deleted)
    }

    // =========================================================================
    // Computations
    // =========================================================================

    /// Create a computation over stored files of the scope.
    #[instrument(skip(self, hashes), fields(scope = %scope, files = hashes.len()))]
    pub async fn setup(
        &self,
        scope: &OwnerScope,
        hashes: Vec<ContentHash>,
        options: ReadOptions,
    ) -> Result<ComputationId> {
        let mut seen = HashSet::new();
        let hashes: Vec<ContentHash> = hashes.into_iter().filter(|h| seen.insert(h.clone())).collect();
        if hashes.is_empty() {
            return Err(Error::Validation("no files selected".into()));
        }
        self.ensure_user_space(scope).await?;

        let _guard = self.quota.lock_scope(scope).await;

        let mut located = Vec::with_capacity(hashes.len());
        let mut total = 0u64;
        for hash in &hashes {
            let (path, file) = self.store.locate(scope, hash).await?;
            total += file.size_bytes;
            located.push((path, file));
        }
        if total > self.config.limits.max_file_size {
            return Err(Error::Validation(format!(
                "selected files total {} bytes, more than the {} byte limit",
                total, self.config.limits.max_file_size
            )));
        }

        let inputs = located
            .iter()
            .map(|(_, file)| ComputationInput {
                content_hash: file.content_hash.clone(),
                display_name: file.display_name.clone(),
            })
            .collect();
        let set = ComputationSet::new(scope.clone(), inputs, options);

        let input_dir = self.layout.input_dir(scope, &set.id);
        let sources: Vec<PathBuf> = located.into_iter().map(|(path, _)| path).collect();
        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&input_dir)?;
            for source in sources {
                if let Some(name) = source.file_name() {
                    store_fs::link_or_copy(&source, &input_dir.join(name))?;
                }
            }
            Ok(())
        })
        .await??;

        self.computations.save(&set).await?;
        self.events
            .publish(DomainEvent::computation_created(&set.id, scope, set.inputs.len()))
            .await?;
        info!(computation = %set.id, "Computation set up");
        Ok(set.id)
    }

    /// Methods and parameter sets usable for every file of the computation.
    #[instrument(skip(self), fields(scope = %scope, computation = %id))]
    pub async fn suitable_methods(&self, scope: &OwnerScope, id: &ComputationId) -> Result<SuitableMethods> {
        let set = self.owned_set(scope, id).await?;
        self.suitable_for(&set).await
    }

    async fn suitable_for(&self, set: &ComputationSet) -> Result<SuitableMethods> {
        let mut paths = Vec::with_capacity(set.inputs.len());
        for input in &set.inputs {
            paths.push(self.store.resolve(&set.owner, &input.content_hash).await?);
        }
        self.resolver.resolve(&paths, set.options).await
    }

    /// Calculate charges of every file for every config.
    ///
    /// Cached fingerprints are served from the cache; the rest go to the
    /// engine. An empty `configs` means the first suitable method with its
    /// first parameter set. Results follow the order of `configs`, and parts
    /// follow the file order of the computation.
    #[instrument(skip(self, configs), fields(scope = %scope, computation = %id))]
    pub async fn calculate(
        &self,
        scope: &OwnerScope,
        id: &ComputationId,
        configs: Vec<CalculationConfig>,
    ) -> Result<Vec<CalculationResult>> {
        let started = Instant::now();
        let set = self.owned_set(scope, id).await?;
        self.ensure_user_space(scope).await?;

        let configs = if configs.is_empty() {
            let default = self
                .suitable_for(&set)
                .await?
                .default_config()
                .ok_or_else(|| Error::Validation("no method is suitable for the selected files".into()))?;
            debug!(config = %default, "Using default config");
            vec![default]
        } else {
            let mut seen = HashSet::new();
            configs.into_iter().filter(|c| seen.insert(c.clone())).collect()
        };

        let fingerprints = fingerprints_for(&set.hashes(), &configs, set.options);
        let partition = self.cache.partition(&fingerprints).await?;

        let jobs: Vec<CalculationJob> = partition
            .to_compute
            .iter()
            .map(|(config, hashes)| CalculationJob {
                scope: scope.clone(),
                config: config.clone(),
                options: set.options,
                inputs: set
                    .inputs
                    .iter()
                    .filter(|input| hashes.contains(&input.content_hash))
                    .cloned()
                    .collect(),
            })
            .collect();
        let computed = self.executor.run_all(jobs).await?;

        let mut fresh: HashMap<CalculationConfig, HashMap<ContentHash, CalculationPart>> = HashMap::new();
        for result in computed {
            let parts = result
                .calculations
                .into_iter()
                .map(|part| (part.file_hash.clone(), part))
                .collect();
            fresh.insert(result.config, parts);
        }

        let mut results = Vec::with_capacity(configs.len());
        let mut events = Vec::with_capacity(configs.len());
        for config in &configs {
            let mut computed_parts = fresh.remove(config).unwrap_or_default();
            let mut cached_parts: HashMap<ContentHash, CalculationPart> = partition
                .cached
                .get(config)
                .map(|records| {
                    records
                        .iter()
                        .map(|record| (record.fingerprint.content_hash.clone(), CalculationPart::from(record)))
                        .collect()
                })
                .unwrap_or_default();
            let cached = cached_parts.len();
            let computed = computed_parts.len();

            let mut result = CalculationResult::new(config.clone());
            for input in &set.inputs {
                let part = computed_parts
                    .remove(&input.content_hash)
                    .or_else(|| cached_parts.remove(&input.content_hash));
                if let Some(mut part) = part {
                    part.file = input.display_name.clone();
                    result.calculations.push(part);
                }
            }

            events.push(DomainEvent::calculation_completed(
                id,
                config,
                computed,
                cached,
                result.failed(),
                started.elapsed(),
            ));
            results.push(result);
        }

        // Re-read under the lock: concurrent calculations add their own
        // configs, and the set may have been deleted or evicted meanwhile.
        let guard = self.quota.lock_scope(scope).await;
        match self.computations.get(id).await?.filter(|current| &current.owner == scope) {
            Some(mut current) => {
                for config in &configs {
                    current.add_config(config);
                }
                self.computations.save(&current).await?;

                let charges_dir = self.layout.charges_dir(scope, id);
                let to_write = results.clone();
                tokio::task::spawn_blocking(move || output::write_results(&charges_dir, &to_write)).await??;
                self.reclaim_guest_space(&guard, id, &mut events).await?;
            }
            None => {
                let mut gone = set;
                for config in &configs {
                    gone.add_config(config);
                }
                let released = self.drop_set(&gone).await?;
                warn!(released, "Computation removed while calculating, results not kept");
            }
        }
        drop(guard);

        self.events.publish_all(events).await?;
        Ok(results)
    }

    /// Results of every config calculated so far, read from the cache.
    /// Fingerprints whose calculation failed have no record and are left out.
    pub async fn results(&self, scope: &OwnerScope, id: &ComputationId) -> Result<Vec<CalculationResult>> {
        let set = self.owned_set(scope, id).await?;
        let mut results = Vec::with_capacity(set.configs.len());
        for config in &set.configs {
            let mut result = CalculationResult::new(config.clone());
            for input in &set.inputs {
                let fingerprint =
                    CalculationFingerprint::new(input.content_hash.clone(), config.clone(), set.options);
                if let Some(record) = self.cache.lookup(&fingerprint).await? {
                    let mut part = CalculationPart::from(&record);
                    part.file = input.display_name.clone();
                    result.calculations.push(part);
                }
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Delete a computation and the records no other computation refers to.
    #[instrument(skip(self), fields(scope = %scope, computation = %id))]
    pub async fn delete_computation(&self, scope: &OwnerScope, id: &ComputationId) -> Result<()> {
        let set = self.owned_set(scope, id).await?;
        let released = {
            let _guard = self.quota.lock_scope(scope).await;
            let dir = self.layout.computation_dir(scope, id);
            tokio::task::spawn_blocking(move || store_fs::remove_path(&dir)).await??;
            self.drop_set(&set).await?
        };
        self.events
            .publish(DomainEvent::computation_deleted(id, released))
            .await?;
        info!(released, "Computation deleted");
        Ok(())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn quota(&self, scope: &OwnerScope) -> Result<QuotaReport> {
        self.quota.report(scope).await
    }

    pub async fn available_methods(&self) -> Result<Vec<String>> {
        let engine = self.engine.clone();
        Ok(self.pool.run(move || engine.available_methods()).await??)
    }

    pub async fn available_parameters(&self, method: &str) -> Result<Vec<String>> {
        let engine = self.engine.clone();
        let method = method.to_string();
        Ok(self
            .pool
            .run(move || engine.available_parameters(&method))
            .await??)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache: self.cache.metrics().snapshot(),
            executor: self.executor.metrics().snapshot(),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// A computation is only visible to the scope that created it.
    async fn owned_set(&self, scope: &OwnerScope, id: &ComputationId) -> Result<ComputationSet> {
        self.computations
            .get(id)
            .await?
            .filter(|set| &set.owner == scope)
            .ok_or_else(|| Error::not_found("computation", id))
    }

    /// Users with no space left cannot start new work.
    async fn ensure_user_space(&self, scope: &OwnerScope) -> Result<()> {
        if scope.is_guest() {
            return Ok(());
        }
        let report = self.quota.report(scope).await?;
        if report.available == 0 {
            return Err(Error::QuotaExceeded {
                used: report.used,
                requested: 0,
                quota: report.quota,
            });
        }
        Ok(())
    }

    async fn reclaim_guest_space(
        &self,
        guard: &ScopeGuard,
        current: &ComputationId,
        events: &mut Vec<DomainEvent>,
    ) -> Result<()> {
        for evicted in self.quota.reclaim_compute_space(guard, Some(*current)).await? {
            if let Some(set) = self.computations.get(&evicted.id).await? {
                self.drop_set(&set).await?;
            }
            if evicted.id == *current {
                warn!(computation = %current, "Evicted the computation that was just calculated");
            }
            events.push(DomainEvent::computation_evicted(&evicted.id, evicted.size_bytes));
        }
        Ok(())
    }

    /// Forget a set and release the records only it refers to.
    async fn drop_set(&self, set: &ComputationSet) -> Result<usize> {
        let still_used: HashSet<CalculationFingerprint> = self
            .computations
            .list()
            .await?
            .iter()
            .filter(|other| other.id != set.id)
            .flat_map(|other| other.fingerprints())
            .collect();
        let exclusive: Vec<CalculationFingerprint> = set
            .fingerprints()
            .into_iter()
            .filter(|fp| !still_used.contains(fp))
            .collect();

        self.computations.delete(&set.id).await?;
        self.cache.release(&exclusive).await
    }
}
