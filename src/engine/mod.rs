//! Concurrency primitives shared by the scan modules.
//!
//! Modules hand a task list to [`run_pool`], which fans it out over a bounded
//! set of tokio workers and folds the results back through an [`Aggregator`].

mod aggregate;
mod pool;

pub use aggregate::Aggregator;
pub use pool::{run_pool, PoolConfig};
