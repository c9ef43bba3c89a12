//! Storage quotas
//!
//! User scopes are checked and rejected up front. The guest pool evicts its
//! least recently modified files before uploads, and its least recently
//! modified computation directories after calculations.

mod manager;
mod policy;
mod proptest;

pub use manager::{EvictedComputation, EvictedFile, QuotaManager, ScopeGuard};
pub use policy::{plan_eviction, EvictionCandidate, EvictionPlan};
