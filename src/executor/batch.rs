//! Calculation batches
//!
//! One [`CalculationJob`] is one config applied to a list of stored files.
//! Files fan out concurrently and every file ends as its own success or
//! failure; only infrastructure errors abort the batch.
//!
//! Engine calls pass through two limits: a counting admission gate sized by
//! `max_concurrent_calculations`, then the fixed worker pool that runs the
//! blocking call. Identical fingerprints requested concurrently share one
//! engine call, and a fingerprint committed since partitioning is read back
//! instead of recomputed.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, instrument, warn};

use super::metrics::ExecutorMetrics;
use super::pool::WorkerPool;
use crate::cache::CalculationCache;
use crate::domain::model::{
    CalculationConfig, CalculationFingerprint, CalculationPart, CalculationResult, Charges,
    ComputationInput, OwnerScope, ReadOptions,
};
use crate::domain::ports::ChargeEngine;
use crate::error::{EngineError, Error, Result};
use crate::store::ContentStore;

type Outcome = std::result::Result<Charges, EngineError>;

/// One config over a list of files owned by `scope`.
#[derive(Debug, Clone)]
pub struct CalculationJob {
    pub scope: OwnerScope,
    pub config: CalculationConfig,
    pub options: ReadOptions,
    pub inputs: Vec<ComputationInput>,
}

pub struct CalculationExecutor {
    engine: Arc<dyn ChargeEngine>,
    store: ContentStore,
    cache: Arc<CalculationCache>,
    pool: Arc<WorkerPool>,
    gate: Arc<Semaphore>,
    inflight: DashMap<CalculationFingerprint, Arc<OnceCell<Outcome>>>,
    metrics: Arc<ExecutorMetrics>,
}

impl CalculationExecutor {
    pub fn new(
        engine: Arc<dyn ChargeEngine>,
        store: ContentStore,
        cache: Arc<CalculationCache>,
        pool: Arc<WorkerPool>,
        max_concurrent_calculations: usize,
    ) -> Self {
        Self {
            engine,
            store,
            cache,
            pool,
            gate: Arc::new(Semaphore::new(max_concurrent_calculations.max(1))),
            inflight: DashMap::new(),
            metrics: Arc::new(ExecutorMetrics::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<ExecutorMetrics> {
        &self.metrics
    }

    /// Run several jobs concurrently, sharing the gate and the pool.
    pub async fn run_all(&self, jobs: Vec<CalculationJob>) -> Result<Vec<CalculationResult>> {
        try_join_all(jobs.into_iter().map(|job| self.run(job))).await
    }

    /// Compute every file of the job. Parts keep the input order.
    #[instrument(skip(self, job), fields(config = %job.config, files = job.inputs.len()))]
    pub async fn run(&self, job: CalculationJob) -> Result<CalculationResult> {
        let mut seen = HashSet::new();
        let inputs: Vec<ComputationInput> = job
            .inputs
            .into_iter()
            .filter(|input| seen.insert(input.content_hash.clone()))
            .collect();

        let parts = try_join_all(
            inputs
                .iter()
                .map(|input| self.compute_one(&job.scope, &job.config, job.options, input)),
        )
        .await?;

        let result = CalculationResult {
            config: job.config,
            calculations: parts,
        };
        debug!(failed = result.failed(), "Calculation batch finished");
        Ok(result)
    }

    async fn compute_one(
        &self,
        scope: &OwnerScope,
        config: &CalculationConfig,
        options: ReadOptions,
        input: &ComputationInput,
    ) -> Result<CalculationPart> {
        let fingerprint = CalculationFingerprint::new(input.content_hash.clone(), config.clone(), options);
        let cell = self
            .inflight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let led = AtomicBool::new(false);
        let outcome = {
            let led = &led;
            let fingerprint = &fingerprint;
            cell.get_or_try_init(|| async move {
                led.store(true, Ordering::Relaxed);
                self.compute_and_commit(scope, fingerprint, &input.display_name)
                    .await
            })
            .await
            .map(Outcome::clone)
        };

        if led.load(Ordering::Relaxed) {
            self.inflight
                .remove_if(&fingerprint, |_, current| Arc::ptr_eq(current, &cell));
        } else if outcome.is_ok() {
            self.metrics.record_coalesced();
        }

        Ok(match outcome? {
            Ok(charges) => CalculationPart::success(&input.display_name, input.content_hash.clone(), charges),
            Err(error) => CalculationPart::failure(&input.display_name, input.content_hash.clone(), error),
        })
    }

    async fn compute_and_commit(
        &self,
        scope: &OwnerScope,
        fingerprint: &CalculationFingerprint,
        display_name: &str,
    ) -> Result<Outcome> {
        if let Some(record) = self.cache.lookup(fingerprint).await? {
            self.metrics.record_late_hit();
            return Ok(Ok(record.charges));
        }

        let path = match self.store.resolve(scope, &fingerprint.content_hash).await {
            Ok(path) => path,
            Err(Error::NotFound { .. }) => {
                return Ok(Err(EngineError::new(format!(
                    "input file {} is no longer stored",
                    fingerprint.content_hash
                ))))
            }
            Err(e) => return Err(e),
        };

        match self.invoke(path, &fingerprint.config, fingerprint.options).await? {
            Ok(charges) => {
                let record = self
                    .cache
                    .commit(fingerprint.clone(), display_name, charges)
                    .await?;
                Ok(Ok(record.charges))
            }
            Err(error) => {
                warn!(
                    file = %display_name,
                    config = %fingerprint.config,
                    error = %error,
                    "Charge calculation failed"
                );
                Ok(Err(error))
            }
        }
    }

    async fn invoke(&self, path: PathBuf, config: &CalculationConfig, options: ReadOptions) -> Result<Outcome> {
        let _permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("admission gate closed".into()))?;

        self.metrics.record_engine_call();
        self.metrics.start_call();
        let engine = self.engine.clone();
        let config = config.clone();
        let result = self
            .pool
            .run(move || {
                let molecules = engine.load_molecules(&path, &options)?;
                engine.calculate_charges(&*molecules, &config)
            })
            .await;
        self.metrics.finish_call();

        let outcome = match result {
            Ok(outcome) => outcome,
            // A panicking engine call is reported like any other engine failure.
            Err(Error::Internal(message)) => Err(EngineError::new(message)),
            Err(e) => return Err(e),
        };
        if outcome.is_err() {
            self.metrics.record_engine_failure();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryCalculationRepository, ScriptedEngine};
    use crate::store::StorageLayout;
    use bytes::Bytes;
    use std::time::Duration;

    const BENZENE: &str = "benzene\n  test\n\n  6  6  0  0  0  0  0  0  0  0999 V2000\nM  END\n$$$$\n";

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Arc<ScriptedEngine>,
        store: ContentStore,
        executor: CalculationExecutor,
    }

    fn fixture(engine: ScriptedEngine, gate: usize, workers: usize) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let store = ContentStore::new(StorageLayout::new(dir.path()));
        let cache = Arc::new(CalculationCache::new(Arc::new(MemoryCalculationRepository::new())));
        let executor = CalculationExecutor::new(
            engine.clone(),
            store.clone(),
            cache,
            Arc::new(WorkerPool::new(workers).unwrap()),
            gate,
        );
        Fixture {
            _dir: dir,
            engine,
            store,
            executor,
        }
    }

    async fn upload(store: &ContentStore, body: &str, name: &str) -> ComputationInput {
        let stored = store
            .store(&OwnerScope::Guest, Bytes::from(body.to_string()), name)
            .await
            .unwrap();
        ComputationInput {
            content_hash: stored.file.content_hash,
            display_name: name.to_string(),
        }
    }

    fn job(config: CalculationConfig, inputs: Vec<ComputationInput>) -> CalculationJob {
        CalculationJob {
            scope: OwnerScope::Guest,
            config,
            options: ReadOptions::default(),
            inputs,
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_file() {
        let f = fixture(ScriptedEngine::new().failing_on("broken"), 4, 4);
        let good = upload(&f.store, BENZENE, "good.sdf").await;
        let bad = upload(&f.store, "broken\n", "bad.sdf").await;

        let result = f
            .executor
            .run(job(CalculationConfig::parameterless("eem"), vec![good, bad]))
            .await
            .unwrap();

        assert_eq!(result.calculations.len(), 2);
        assert!(result.calculations[0].is_success());
        assert_eq!(result.calculations[0].charges().unwrap()["benzene"].len(), 6);
        assert!(!result.calculations[1].is_success());
        assert_eq!(result.failed(), 1);
        assert_eq!(f.executor.metrics().engine_failures(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_failed_part() {
        let f = fixture(ScriptedEngine::new(), 4, 4);
        let input = ComputationInput {
            content_hash: crate::domain::model::ContentHash::parse(&"0".repeat(64)).unwrap(),
            display_name: "gone.sdf".into(),
        };

        let result = f
            .executor
            .run(job(CalculationConfig::parameterless("eem"), vec![input]))
            .await
            .unwrap();
        assert_eq!(result.failed(), 1);
        assert_eq!(f.engine.calculation_calls(), 0);
    }

    #[tokio::test]
    async fn test_admission_gate_bounds_engine_calls() {
        let f = fixture(ScriptedEngine::new().with_delay(Duration::from_millis(30)), 2, 4);
        let mut inputs = Vec::new();
        for i in 0..6 {
            inputs.push(upload(&f.store, &format!("mol{}\n", i), &format!("m{}.sdf", i)).await);
        }

        let result = f
            .executor
            .run(job(CalculationConfig::parameterless("eem"), inputs))
            .await
            .unwrap();

        assert_eq!(result.failed(), 0);
        assert_eq!(f.engine.calculation_calls(), 6);
        assert!(f.engine.peak_concurrency() <= 2);
    }

    #[tokio::test]
    async fn test_concurrent_identical_work_calls_engine_once() {
        let f = fixture(ScriptedEngine::new().with_delay(Duration::from_millis(50)), 4, 4);
        let input = upload(&f.store, BENZENE, "benzene.sdf").await;
        let config = CalculationConfig::parameterless("eem");

        let results = f
            .executor
            .run_all(vec![
                job(config.clone(), vec![input.clone()]),
                job(config.clone(), vec![input.clone()]),
            ])
            .await
            .unwrap();

        assert_eq!(f.engine.calculation_calls(), 1);
        assert_eq!(
            results[0].calculations[0].charges(),
            results[1].calculations[0].charges()
        );

        // Committed by the first run, so a later batch reads it back.
        f.executor.run(job(config, vec![input])).await.unwrap();
        assert_eq!(f.engine.calculation_calls(), 1);
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_failed_part() {
        let f = fixture(ScriptedEngine::new().panicking_on("explode"), 4, 1);
        let boom = upload(&f.store, "explode\n", "boom.sdf").await;
        let fine = upload(&f.store, BENZENE, "fine.sdf").await;

        let result = f
            .executor
            .run(job(CalculationConfig::parameterless("eem"), vec![boom, fine]))
            .await
            .unwrap();
        assert!(!result.calculations[0].is_success());
        assert!(result.calculations[1].is_success());
    }

    #[tokio::test]
    async fn test_duplicate_inputs_collapse() {
        let f = fixture(ScriptedEngine::new(), 4, 4);
        let input = upload(&f.store, BENZENE, "benzene.sdf").await;

        let result = f
            .executor
            .run(job(CalculationConfig::parameterless("eem"), vec![input.clone(), input]))
            .await
            .unwrap();
        assert_eq!(result.calculations.len(), 1);
    }
}
