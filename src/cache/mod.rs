//! Calculation cache
//!
//! At most one [`CalculationRecord`](crate::domain::CalculationRecord) exists
//! per fingerprint; repeated requests read it instead of calling the engine.

mod calculation_cache;
mod metrics;

pub use calculation_cache::{CalculationCache, Partition};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
