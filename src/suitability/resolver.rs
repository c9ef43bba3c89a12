use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use super::tally::SuitabilityTally;
use crate::domain::model::{ReadOptions, SuitableMethods};
use crate::domain::ports::{ChargeEngine, MethodSuitability};
use crate::error::{Error, Result};
use crate::executor::WorkerPool;

/// Finds the methods and parameter sets usable for every file of a set.
pub struct SuitabilityResolver {
    engine: Arc<dyn ChargeEngine>,
    pool: Arc<WorkerPool>,
}

impl SuitabilityResolver {
    pub fn new(engine: Arc<dyn ChargeEngine>, pool: Arc<WorkerPool>) -> Self {
        Self { engine, pool }
    }

    /// Ask the engine about each file, then intersect.
    ///
    /// An engine failure on any file fails the whole resolution.
    #[instrument(skip(self, paths), fields(files = paths.len()))]
    pub async fn resolve(&self, paths: &[PathBuf], options: ReadOptions) -> Result<SuitableMethods> {
        let per_file = try_join_all(paths.iter().map(|path| self.query_file(path.clone(), options))).await?;

        let mut tally = SuitabilityTally::new();
        for suitable in &per_file {
            tally.add_file(suitable);
        }
        let result = tally.finish();
        debug!(methods = result.methods.len(), "Resolved suitable methods");
        Ok(result)
    }

    async fn query_file(&self, path: PathBuf, options: ReadOptions) -> Result<Vec<MethodSuitability>> {
        let engine = self.engine.clone();
        let shown = path.clone();
        self.pool
            .run(move || {
                let molecules = engine.load_molecules(&path, &options)?;
                engine.suitable_methods(&*molecules)
            })
            .await?
            .map_err(|e| {
                warn!(file = %shown.display(), error = %e, "Engine failed during suitability check");
                Error::Engine(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedEngine;
    use assert_matches::assert_matches;

    fn write(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn test_intersection_over_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new().with_suitability(|text| {
            let mut methods = vec![MethodSuitability::parameterless("eem")];
            if !text.contains("metal") {
                methods.push(MethodSuitability::parameterless("sqe"));
            }
            methods
        });
        let resolver = SuitabilityResolver::new(Arc::new(engine), Arc::new(WorkerPool::new(2).unwrap()));

        let paths = vec![
            write(dir.path(), "1.sdf", "organic"),
            write(dir.path(), "2.sdf", "organic"),
            write(dir.path(), "3.sdf", "metal"),
        ];
        let result = resolver.resolve(&paths, ReadOptions::default()).await.unwrap();
        assert_eq!(result.methods, vec!["eem".to_string()]);

        let result = resolver.resolve(&paths[..2], ReadOptions::default()).await.unwrap();
        assert_eq!(result.methods, vec!["eem".to_string(), "sqe".to_string()]);
    }

    #[tokio::test]
    async fn test_one_unreadable_file_fails_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ScriptedEngine::new().failing_on("corrupt");
        let resolver = SuitabilityResolver::new(Arc::new(engine), Arc::new(WorkerPool::new(2).unwrap()));

        let paths = vec![
            write(dir.path(), "ok.sdf", "fine"),
            write(dir.path(), "bad.sdf", "corrupt"),
        ];
        assert_matches!(
            resolver.resolve(&paths, ReadOptions::default()).await,
            Err(Error::Engine(_))
        );
    }
}
