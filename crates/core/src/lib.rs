//! `ordo-core`: shared building blocks of the background execution core.
//!
//! This crate contains the **data model** exchanged between callers, worker
//! pools and the job queue (no threads, no runtime concerns).

pub mod config;
pub mod error;
pub mod id;
pub mod task;

pub use config::{EnvSource, ProcessEnv};
pub use error::{ConfigError, PoolError, PoolResult};
pub use id::{JobId, TaskId};
pub use task::{TaskOptions, WorkerResult, WorkerTask};
