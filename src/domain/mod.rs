//! Domain Layer
//!
//! Value objects, ports and events shared by every component.
//!
//! - **Model** (`model.rs`) - identifiers, configs, records
//! - **Ports** (`ports.rs`) - trait abstractions for the engine and persistence
//! - **Events** (`events.rs`) - domain events for audit and observation
//!
//! # Usage
//!
//! ```ignore
//! use chargeflow::domain::ports::{CalculationRepository, ChargeEngine};
//!
//! async fn cached<R: CalculationRepository>(repo: &R, fp: &CalculationFingerprint) -> Result<bool> {
//!     Ok(repo.find(fp).await?.is_some())
//! }
//! ```

pub mod events;
pub mod model;
pub mod ports;

pub use events::DomainEvent;
pub use model::{
    fingerprints_for, CalculationConfig, CalculationFingerprint, CalculationPart,
    CalculationRecord, CalculationResult, Charges, ComputationId, ComputationInput,
    ComputationSet, ContentHash, OwnerScope, QuotaReport, ReadOptions, StoredFile,
    SuitableMethods,
};
pub use ports::{
    CalculationRepository, ChargeEngine, Commit, ComputationRepository, EventPublisher,
    MethodSuitability, MoleculeSet,
};
