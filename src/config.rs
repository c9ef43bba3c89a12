//! Application configuration
//!
//! Every section deserializes from YAML with per-field defaults, so a config
//! file only needs to name what it overrides.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    pub executor: ExecutorConfig,
    pub limits: UploadLimits,
}

impl AppConfig {
    /// Load from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.executor.worker_threads == 0 {
            return Err(Error::Config("executor.worker_threads must be at least 1".into()));
        }
        if self.executor.max_concurrent_calculations == 0 {
            return Err(Error::Config(
                "executor.max_concurrent_calculations must be at least 1".into(),
            ));
        }
        if self.limits.allowed_extensions.is_empty() {
            return Err(Error::Config("limits.allowed_extensions is empty".into()));
        }
        Ok(())
    }
}

/// On-disk storage location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/tmp/chargeflow"),
        }
    }
}

/// Byte quotas per owner scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Per-user limit for files and computations together
    pub user_quota: u64,
    /// Guest pool limit for uploaded files
    pub guest_file_quota: u64,
    /// Guest pool limit for computation directories
    pub guest_compute_quota: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            user_quota: GIB,
            guest_file_quota: GIB,
            guest_compute_quota: GIB,
        }
    }
}

/// Engine concurrency limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Admission gate size for in-flight engine calls
    pub max_concurrent_calculations: usize,
    /// Threads in the blocking worker pool
    pub worker_threads: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calculations: 4,
            worker_threads: 4,
        }
    }
}

/// Upload validation limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    /// Largest single file, also the largest total input of one computation
    pub max_file_size: u64,
    /// Largest batch of files in one upload
    pub max_upload_size: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_size: 10 * MIB,
            max_upload_size: 250 * MIB,
            allowed_extensions: ["cif", "mol2", "pdb", "mmcif", "sdf"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl UploadLimits {
    /// Case-insensitive extension check on a display name.
    pub fn extension_allowed(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.executor.max_concurrent_calculations, 4);
        assert_eq!(config.executor.worker_threads, 4);
        assert_eq!(config.quota.guest_file_quota, GIB);
        assert_eq!(config.limits.max_file_size, 10 * MIB);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = AppConfig::from_yaml_str(
            "quota:\n  guest_file_quota: 1000\nexecutor:\n  worker_threads: 2\n",
        )
        .unwrap();
        assert_eq!(config.quota.guest_file_quota, 1000);
        assert_eq!(config.quota.user_quota, GIB);
        assert_eq!(config.executor.worker_threads, 2);
        assert_eq!(config.executor.max_concurrent_calculations, 4);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let result = AppConfig::from_yaml_str("executor:\n  worker_threads: 0\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_extension_allowed() {
        let limits = UploadLimits::default();
        assert!(limits.extension_allowed("benzene.sdf"));
        assert!(limits.extension_allowed("PROTEIN.PDB"));
        assert!(!limits.extension_allowed("notes.txt"));
        assert!(!limits.extension_allowed("noext"));
    }
}
