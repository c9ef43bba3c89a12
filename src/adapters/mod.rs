//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  ChargeEngine │ CalculationRepository │ ComputationRepo    │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ ProcessEngine │ ScriptedEngine │ FsCalculationRepository   │ │
//! │  │ Memory*Repository │ LoggingEventPublisher                  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chargeflow::adapters::{FsCalculationRepository, ProcessEngine};
//! use chargeflow::domain::ports::ChargeEngine;
//!
//! let engine = ProcessEngine::new("chargefw2");
//! let methods = engine.available_methods()?;
//! ```

mod fs_repository;
mod memory_repository;
mod process_engine;
mod scripted_engine;

pub use fs_repository::{FsCalculationRepository, FsComputationRepository};
pub use memory_repository::{MemoryCalculationRepository, MemoryComputationRepository};
pub use process_engine::{FileMolecules, ProcessEngine};
pub use scripted_engine::{ScriptedEngine, ScriptedMolecules};

// Re-export event publishers for convenience
mod event_publisher;
pub use event_publisher::{InMemoryEventCollector, LoggingEventPublisher};
