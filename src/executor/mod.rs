//! Bounded execution of blocking engine calls
//!
//! - [`WorkerPool`] - fixed set of OS threads running blocking jobs
//! - [`CalculationExecutor`] - per-config batches with per-file outcomes

mod batch;
mod metrics;
mod pool;

pub use batch::{CalculationExecutor, CalculationJob};
pub use metrics::{ExecutorMetrics, ExecutorMetricsSnapshot};
pub use pool::WorkerPool;
