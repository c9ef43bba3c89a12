//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the abstractions the orchestration layer depends on.
//! Infrastructure adapters implement these traits to provide concrete
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │ ChargeEngine │ CalculationRepository │ Computation- │    │
//! │  │              │                       │ Repository   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │ ProcessEngine │ FsCalculationRepository │ Memory*   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::any::Any;
use std::path::Path;

use async_trait::async_trait;

use super::events::DomainEvent;
use super::model::{
    CalculationConfig, CalculationFingerprint, CalculationRecord, Charges, ComputationId,
    ComputationSet, ReadOptions,
};
use crate::error::{EngineError, Result};

// =============================================================================
// Charge Engine Port
// =============================================================================

/// Molecules loaded by an engine. Opaque to the orchestration layer.
pub trait MoleculeSet: Send + Sync {
    /// Number of molecules in the set.
    fn molecule_count(&self) -> usize;

    /// Downcast hook for the engine that produced the set.
    fn as_any(&self) -> &dyn Any;
}

/// A method the engine considers usable, with its usable parameter sets.
///
/// An empty `parameters` list means the method takes no parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSuitability {
    pub method: String,
    pub parameters: Vec<String>,
}

impl MethodSuitability {
    pub fn parameterless(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters<I, S>(method: impl Into<String>, parameters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: method.into(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        }
    }
}

/// Port for the native charge calculation engine.
///
/// Every call is blocking and may be CPU bound; callers dispatch them onto
/// the worker pool. There is no cancellation hook: once started a call runs
/// to completion.
pub trait ChargeEngine: Send + Sync + 'static {
    /// List every method the engine knows.
    fn available_methods(&self) -> std::result::Result<Vec<String>, EngineError>;

    /// List the parameter sets of a method.
    fn available_parameters(&self, method: &str) -> std::result::Result<Vec<String>, EngineError>;

    /// Load molecules from a file.
    fn load_molecules(
        &self,
        path: &Path,
        options: &ReadOptions,
    ) -> std::result::Result<Box<dyn MoleculeSet>, EngineError>;

    /// Methods (and parameter sets) applicable to the loaded molecules.
    fn suitable_methods(
        &self,
        molecules: &dyn MoleculeSet,
    ) -> std::result::Result<Vec<MethodSuitability>, EngineError>;

    /// Compute charges for the loaded molecules.
    fn calculate_charges(
        &self,
        molecules: &dyn MoleculeSet,
        config: &CalculationConfig,
    ) -> std::result::Result<Charges, EngineError>;
}

// =============================================================================
// Persistence Ports
// =============================================================================

/// Outcome of an insert into the calculation repository.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// This call created the record.
    Inserted(CalculationRecord),
    /// A record for the fingerprint already existed; the offered one was discarded.
    Existing(CalculationRecord),
}

impl Commit {
    pub fn record(&self) -> &CalculationRecord {
        match self {
            Commit::Inserted(record) | Commit::Existing(record) => record,
        }
    }

    pub fn into_record(self) -> CalculationRecord {
        match self {
            Commit::Inserted(record) | Commit::Existing(record) => record,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Commit::Inserted(_))
    }
}

/// Port for calculation record persistence.
///
/// Implementations must enforce uniqueness of the fingerprint at the storage
/// boundary: two concurrent `insert_if_absent` calls for one fingerprint
/// yield exactly one `Commit::Inserted`.
#[async_trait]
pub trait CalculationRepository: Send + Sync {
    /// Find the record for a fingerprint.
    async fn find(&self, fingerprint: &CalculationFingerprint) -> Result<Option<CalculationRecord>>;

    /// Insert unless a record with the same fingerprint exists (first commit wins).
    async fn insert_if_absent(&self, record: CalculationRecord) -> Result<Commit>;

    /// Remove the record for a fingerprint.
    async fn remove(&self, fingerprint: &CalculationFingerprint) -> Result<bool>;

    /// Number of stored records.
    async fn count(&self) -> Result<usize>;
}

/// Port for computation set persistence.
#[async_trait]
pub trait ComputationRepository: Send + Sync {
    /// Insert or replace a computation set.
    async fn save(&self, set: &ComputationSet) -> Result<()>;

    /// Find a computation set by id.
    async fn get(&self, id: &ComputationId) -> Result<Option<ComputationSet>>;

    /// Delete a computation set.
    async fn delete(&self, id: &ComputationId) -> Result<bool>;

    /// List every computation set.
    async fn list(&self) -> Result<Vec<ComputationSet>>;
}

// =============================================================================
// Event Publisher Port
// =============================================================================

/// Port for publishing domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a domain event.
    async fn publish(&self, event: DomainEvent) -> Result<()>;

    /// Publish multiple events.
    async fn publish_all(&self, events: Vec<DomainEvent>) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================
