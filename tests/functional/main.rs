// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Functional tests for the ResourceLimiter reconciler.
//!
//! The real reconcile algorithm runs against an in-memory cluster, so these
//! tests need no Kubernetes and finish in milliseconds.
//!
//! ```bash
//! cargo test --test functional
//! ```
//!
//! ## Test Categories
//!
//! - **Convergence tests**: quotas created, updated and pruned to match the limiter definition
//! - **Lifecycle tests**: stop, restart and finalizer-gated deletion

#[path = "../common/mod.rs"]
mod common;

mod convergence_tests;

pub use mock_state::*;
