//! Instance-side machinery: SSH addressing, remote execution, transfers,
//! the per-target lifecycle and the worker pool that fans targets out.

pub mod config;
pub mod dispatch;
pub mod orchestrator;
pub mod remote;
pub mod retry;
pub mod sync;
pub mod worker;
