//! Remote job monitoring: the typed process query and the completion
//! poller built on top of it.

pub mod poller;
pub mod process;
