//! Local on-disk state: per-workspace runtime records and the addressing
//! state of launched instances.

pub mod instances;
pub mod runtime;
