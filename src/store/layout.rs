//! On-disk storage layout
//!
//! ```text
//! <root>/
//!   guest/{files,computations}/
//!   users/<id>/{files,computations}/
//!   tmp/                              upload staging
//!   db/calculations/<digest>.json     one record per fingerprint
//!   db/computations/<id>.json
//! ```

use std::path::{Path, PathBuf};

use crate::domain::model::{ComputationId, OwnerScope};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the shared directories.
    pub fn ensure(&self) -> Result<()> {
        std::fs::create_dir_all(self.tmp_dir())?;
        std::fs::create_dir_all(self.calculations_db())?;
        std::fs::create_dir_all(self.computations_db())?;
        Ok(())
    }

    /// Everything counted against the scope's quota.
    pub fn scope_root(&self, scope: &OwnerScope) -> PathBuf {
        match scope {
            OwnerScope::Guest => self.root.join("guest"),
            OwnerScope::User(id) => self.root.join("users").join(id),
        }
    }

    pub fn files_dir(&self, scope: &OwnerScope) -> PathBuf {
        self.scope_root(scope).join("files")
    }

    pub fn computations_dir(&self, scope: &OwnerScope) -> PathBuf {
        self.scope_root(scope).join("computations")
    }

    pub fn computation_dir(&self, scope: &OwnerScope, id: &ComputationId) -> PathBuf {
        self.computations_dir(scope).join(id.to_string())
    }

    pub fn input_dir(&self, scope: &OwnerScope, id: &ComputationId) -> PathBuf {
        self.computation_dir(scope, id).join("input")
    }

    pub fn charges_dir(&self, scope: &OwnerScope, id: &ComputationId) -> PathBuf {
        self.computation_dir(scope, id).join("charges")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn calculations_db(&self) -> PathBuf {
        self.root.join("db").join("calculations")
    }

    pub fn computations_db(&self) -> PathBuf {
        self.root.join("db").join("computations")
    }
}
