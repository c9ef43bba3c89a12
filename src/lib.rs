//! Chargeflow - Partial Atomic Charge Calculation Orchestration
//!
//! Orchestrates a native charge engine over uploaded molecule files. Files are
//! stored content-addressed per owner scope, every result is cached under the
//! fingerprint that produced it, and the shared guest pool evicts its oldest
//! data to stay within quota.
//!
//! # Architecture
//!
//! ```text
//! upload ─▶ ContentStore ─▶ QuotaManager (evict guest files)
//!                │
//! calculate ─▶ CalculationCache ─▶ CalculationExecutor ─▶ WorkerPool ─▶ ChargeEngine
//!                (partition)        (gate + single-flight)   (fixed threads)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Engine, repository and event publisher implementations
//! - [`cache`] - Fingerprint-keyed calculation results
//! - [`config`] - YAML configuration
//! - [`domain`] - Domain model, ports and events
//! - [`error`] - Error types
//! - [`executor`] - Worker pool and batched engine calls
//! - [`quota`] - Quota accounting and eviction
//! - [`service`] - Operations exposed to callers
//! - [`store`] - Content-addressed file storage
//! - [`suitability`] - Methods valid for every file of a computation

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod quota;
pub mod service;
pub mod store;
pub mod suitability;

// Re-export commonly used types
pub use config::AppConfig;
pub use domain::{
    CalculationConfig, CalculationResult, ChargeEngine, ComputationId, ContentHash, OwnerScope, ReadOptions,
};
pub use error::{Error, Result};
pub use service::{ChargeService, MetricsSnapshot, UploadFile};
