//! Worker pools.
//!
//! ## Components
//!
//! - `TaskRegistry`: typed handlers per task type
//! - `WorkerInstance`: one OS thread running one task at a time
//! - `WorkerPool`: dispatcher thread, priority queue, timeouts and respawn
//! - `WorkerPoolManager`: named pools created on first use
//! - `ComputePool`: pool variant serving compute modules

pub mod compute;
pub mod config;
mod dispatcher;
pub mod instance;
pub mod manager;
mod monitor;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod stats;

pub use compute::{
    ComputeCall, ComputeModule, ComputeOptions, ComputePool, ComputeResult, ComputeStats,
    ModuleCatalog,
};
pub use config::WorkerPoolConfig;
pub use instance::WorkerInstance;
pub use manager::{GENERIC_POOL, WorkerPoolManager};
pub use monitor::MonitorHandle;
pub use pool::WorkerPool;
pub use queue::TaskQueue;
pub use registry::{TaskHandler, TaskRegistry};
pub use stats::{DetailedPoolStats, PoolPerformance, PoolStats};
