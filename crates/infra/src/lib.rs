//! Execution infrastructure: worker pools and the job queue built on them.

pub mod jobs;
pub mod workers;
