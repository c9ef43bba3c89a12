//! Domain value objects
//!
//! Identifiers, calculation configurations and the records that flow between
//! the store, the cache and the executor.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EngineError, Error, Result};

/// Partial charges keyed by molecule id, one value per atom.
pub type Charges = BTreeMap<String, Vec<f64>>;

// =============================================================================
// Identifiers
// =============================================================================

/// Lowercase hex SHA-256 digest of a stored file's normalized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of a hex encoded SHA-256 digest.
    pub const LEN: usize = 64;

    /// Parse a hex digest, rejecting anything that is not 64 hex characters.
    pub fn parse(value: &str) -> Result<Self> {
        if value.len() != Self::LEN || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Validation(format!("invalid content hash '{}'", value)));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Identifier of a computation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComputationId(pub Uuid);

impl ComputationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Result<Self> {
        Uuid::parse_str(value)
            .map(Self)
            .map_err(|_| Error::not_found("computation", value))
    }
}

impl Default for ComputationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ComputationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage owner: an authenticated user or the shared guest pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerScope {
    User(String),
    Guest,
}

impl OwnerScope {
    /// Build a user scope. The id becomes a directory name, so it must be a
    /// single plain path component.
    pub fn user(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
        if !valid {
            return Err(Error::Validation(format!("invalid user id '{}'", id)));
        }
        Ok(OwnerScope::User(id))
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, OwnerScope::Guest)
    }
}

impl fmt::Display for OwnerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OwnerScope::User(id) => write!(f, "user:{}", id),
            OwnerScope::Guest => write!(f, "guest"),
        }
    }
}

// =============================================================================
// Stored files
// =============================================================================

/// A file held by the content store for one owner scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub content_hash: ContentHash,
    pub owner_scope: OwnerScope,
    pub display_name: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

// =============================================================================
// Calculation configuration
// =============================================================================

/// Options applied when the engine loads molecules from a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Read HETATM records from PDB/mmCIF files
    pub read_hetatm: bool,
    /// Discard water molecules from PDB/mmCIF files
    pub ignore_water: bool,
    /// Fall back to similar atom/bond types when no exact parameters match
    pub permissive_types: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            read_hetatm: true,
            ignore_water: false,
            permissive_types: true,
        }
    }
}

/// A method with an optional parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub method: String,
    pub parameters: Option<String>,
}

impl CalculationConfig {
    pub fn new(method: impl Into<String>, parameters: Option<String>) -> Self {
        Self {
            method: method.into(),
            parameters,
        }
    }

    pub fn parameterless(method: impl Into<String>) -> Self {
        Self::new(method, None)
    }

    pub fn with_parameters(method: impl Into<String>, parameters: impl Into<String>) -> Self {
        Self::new(method, Some(parameters.into()))
    }
}

impl fmt::Display for CalculationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameters {
            Some(parameters) => write!(f, "{}/{}", self.method, parameters),
            None => write!(f, "{}", self.method),
        }
    }
}

/// Cache key of one reproducible calculation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalculationFingerprint {
    pub content_hash: ContentHash,
    pub config: CalculationConfig,
    pub options: ReadOptions,
}

impl CalculationFingerprint {
    pub fn new(content_hash: ContentHash, config: CalculationConfig, options: ReadOptions) -> Self {
        Self {
            content_hash,
            config,
            options,
        }
    }

    /// Stable digest of the whole tuple, usable as a file name.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.content_hash.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(self.config.method.as_bytes());
        hasher.update([0]);
        match &self.config.parameters {
            Some(parameters) => {
                hasher.update([1]);
                hasher.update(parameters.as_bytes());
            }
            None => hasher.update([0]),
        }
        hasher.update([
            self.options.read_hetatm as u8,
            self.options.ignore_water as u8,
            self.options.permissive_types as u8,
        ]);
        hex::encode(hasher.finalize())
    }
}

/// Cross product of files and configs, config-major.
pub fn fingerprints_for(
    hashes: &[ContentHash],
    configs: &[CalculationConfig],
    options: ReadOptions,
) -> Vec<CalculationFingerprint> {
    configs
        .iter()
        .flat_map(|config| {
            hashes
                .iter()
                .map(move |hash| CalculationFingerprint::new(hash.clone(), config.clone(), options))
        })
        .collect()
}

// =============================================================================
// Calculation results
// =============================================================================

/// Charges computed once for a fingerprint. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    pub id: Uuid,
    pub fingerprint: CalculationFingerprint,
    pub file_name: String,
    pub charges: Charges,
    pub created_at: DateTime<Utc>,
}

impl CalculationRecord {
    pub fn new(fingerprint: CalculationFingerprint, file_name: impl Into<String>, charges: Charges) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            file_name: file_name.into(),
            charges,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of one file within a calculation batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationPart {
    pub file: String,
    pub file_hash: ContentHash,
    pub outcome: std::result::Result<Charges, EngineError>,
}

impl CalculationPart {
    pub fn success(file: impl Into<String>, file_hash: ContentHash, charges: Charges) -> Self {
        Self {
            file: file.into(),
            file_hash,
            outcome: Ok(charges),
        }
    }

    pub fn failure(file: impl Into<String>, file_hash: ContentHash, error: EngineError) -> Self {
        Self {
            file: file.into(),
            file_hash,
            outcome: Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn charges(&self) -> Option<&Charges> {
        self.outcome.as_ref().ok()
    }
}

impl From<&CalculationRecord> for CalculationPart {
    fn from(record: &CalculationRecord) -> Self {
        CalculationPart::success(
            record.file_name.clone(),
            record.fingerprint.content_hash.clone(),
            record.charges.clone(),
        )
    }
}

/// All per-file outcomes for one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationResult {
    pub config: CalculationConfig,
    pub calculations: Vec<CalculationPart>,
}

impl CalculationResult {
    pub fn new(config: CalculationConfig) -> Self {
        Self {
            config,
            calculations: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.calculations.iter().filter(|c| !c.is_success()).count()
    }
}

// =============================================================================
// Computation sets
// =============================================================================

/// An input file as it was named when the computation was set up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationInput {
    pub content_hash: ContentHash,
    pub display_name: String,
}

/// A named collection of input files plus the configs calculated for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationSet {
    pub id: ComputationId,
    pub owner: OwnerScope,
    pub inputs: Vec<ComputationInput>,
    pub options: ReadOptions,
    pub configs: Vec<CalculationConfig>,
    pub created_at: DateTime<Utc>,
}

impl ComputationSet {
    pub fn new(owner: OwnerScope, inputs: Vec<ComputationInput>, options: ReadOptions) -> Self {
        Self {
            id: ComputationId::new(),
            owner,
            inputs,
            options,
            configs: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn hashes(&self) -> Vec<ContentHash> {
        self.inputs.iter().map(|i| i.content_hash.clone()).collect()
    }

    /// Every fingerprint this set refers to.
    pub fn fingerprints(&self) -> Vec<CalculationFingerprint> {
        fingerprints_for(&self.hashes(), &self.configs, self.options)
    }

    /// Record a config, keeping first-seen order and no duplicates.
    pub fn add_config(&mut self, config: &CalculationConfig) {
        if !self.configs.contains(config) {
            self.configs.push(config.clone());
        }
    }
}

// =============================================================================
// Query results
// =============================================================================

/// Methods and parameter sets valid for every file of a computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuitableMethods {
    pub methods: Vec<String>,
    pub parameters: BTreeMap<String, Vec<String>>,
}

impl SuitableMethods {
    /// The first method with its first parameter set, if any method is suitable.
    pub fn default_config(&self) -> Option<CalculationConfig> {
        let method = self.methods.first()?;
        let parameters = self
            .parameters
            .get(method)
            .and_then(|p| p.first())
            .cloned();
        Some(CalculationConfig::new(method.clone(), parameters))
    }
}

/// Storage usage of one owner scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaReport {
    pub scope: OwnerScope,
    pub used: u64,
    pub available: u64,
    pub quota: u64,
}

impl QuotaReport {
    pub fn new(scope: OwnerScope, used: u64, quota: u64) -> Self {
        Self {
            scope,
            used,
            available: quota.saturating_sub(used),
            quota,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::parse(&c.to_string().repeat(64)).unwrap()
    }

    #[test]
    fn test_content_hash_parse() {
        assert!(ContentHash::parse(&"a".repeat(64)).is_ok());
        assert!(ContentHash::parse(&"a".repeat(10)).is_err());
        assert!(ContentHash::parse(&"z".repeat(64)).is_err());
        assert_eq!(
            ContentHash::parse(&"AB".repeat(32)).unwrap().as_str(),
            "ab".repeat(32)
        );
    }

    #[test]
    fn test_user_scope_rejects_path_components() {
        assert!(OwnerScope::user("alice").is_ok());
        assert!(OwnerScope::user("").is_err());
        assert!(OwnerScope::user("..").is_err());
        assert!(OwnerScope::user("a/b").is_err());
        assert_eq!(OwnerScope::Guest.to_string(), "guest");
        assert_eq!(OwnerScope::user("bob").unwrap().to_string(), "user:bob");
    }

    #[test]
    fn test_fingerprint_digest_distinguishes_fields() {
        let base = CalculationFingerprint::new(
            hash('a'),
            CalculationConfig::parameterless("eem"),
            ReadOptions::default(),
        );
        let same = base.clone();
        assert_eq!(base.digest(), same.digest());

        let mut other = base.clone();
        other.options.ignore_water = true;
        assert_ne!(base.digest(), other.digest());

        let mut other = base.clone();
        other.config.parameters = Some(String::new());
        assert_ne!(base.digest(), other.digest());

        let other = CalculationFingerprint::new(
            hash('b'),
            CalculationConfig::parameterless("eem"),
            ReadOptions::default(),
        );
        assert_ne!(base.digest(), other.digest());
    }

    #[test]
    fn test_fingerprints_for_cross_product() {
        let configs = vec![
            CalculationConfig::parameterless("eem"),
            CalculationConfig::with_parameters("qeq", "p1"),
        ];
        let fps = fingerprints_for(&[hash('a'), hash('b')], &configs, ReadOptions::default());
        assert_eq!(fps.len(), 4);
        assert_eq!(fps[0].config, configs[0]);
        assert_eq!(fps[3].config, configs[1]);
        assert_eq!(fps[3].content_hash, hash('b'));
    }

    #[test]
    fn test_default_config() {
        let mut suitable = SuitableMethods::default();
        assert!(suitable.default_config().is_none());

        suitable.methods = vec!["eem".into(), "qeq".into()];
        suitable
            .parameters
            .insert("eem".into(), vec!["p1".into(), "p2".into()]);
        assert_eq!(
            suitable.default_config(),
            Some(CalculationConfig::with_parameters("eem", "p1"))
        );
    }

    #[test]
    fn test_quota_report_saturates() {
        let report = QuotaReport::new(OwnerScope::Guest, 1500, 1000);
        assert_eq!(report.available, 0);
    }

    #[test]
    fn test_computation_set_add_config_dedups() {
        let mut set = ComputationSet::new(OwnerScope::Guest, vec![], ReadOptions::default());
        let config = CalculationConfig::parameterless("eem");
        set.add_config(&config);
        set.add_config(&config);
        assert_eq!(set.configs.len(), 1);
    }

    #[test]
    fn test_part_serialization_keeps_error() {
        let part = CalculationPart::failure("a.sdf", hash('a'), EngineError::new("bad file"));
        let json = serde_json::to_string(&part).unwrap();
        let back: CalculationPart = serde_json::from_str(&json).unwrap();
        assert!(!back.is_success());
        assert_eq!(back.outcome.unwrap_err().message, "bad file");
    }
}
