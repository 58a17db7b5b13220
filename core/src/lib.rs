//! Cloudscan core: distributed scan orchestration over ephemeral cloud
//! instances.
//!
//! One `CloudRunner` drives a target through provisioning, transfers,
//! job launch, completion polling, result sync and teardown. The
//! `Dispatcher` fans many targets (or the chunks of a large target list)
//! out over a bounded worker pool.
//!
//! # Modules
//!
//! - [`context`] - placeholder context and template resolution
//! - [`chunk`] - line-aligned input splitting
//! - [`rig`] - SSH addressing, remote execution, transfers, lifecycle, pool
//! - [`monitor`] - remote process query and completion poller
//! - [`store`] - runtime records and persisted instance state
//! - [`provider`] - cloud provider capability
//! - [`hooks`] - best-effort local and remote hooks
//! - [`workflow`] - flow/module resolution and scan command synthesis
//! - [`types`] - configuration
//! - [`infrastructure`] - command runner, tmux commands, test doubles

pub mod chunk;
pub mod context;
pub mod error;
pub mod hooks;
pub mod infrastructure;
pub mod monitor;
pub mod provider;
pub mod rig;
pub mod store;
pub mod types;
pub mod workflow;
