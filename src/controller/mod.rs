//! Controller module for resource-limiter.
//!
//! Contains the reconciliation loop, the lifecycle state machine, error
//! handling and the cluster access seam the reconciler runs against.

pub mod common;
pub mod context;
pub mod error;
pub mod limiter;
pub mod reconciler;
pub mod state_machine;
pub mod store;
