// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Integration tests for resource-limiter
//!
//! These tests require a running Kubernetes cluster accessible via kubeconfig,
//! with the ResourceLimiter CRD installed (`cargo run --bin crdgen | kubectl apply -f -`).
//! Tests are marked with #[ignore] and must be run explicitly:
//!
//! ```bash
//! cargo test --test integration -- --ignored
//! ```
//!
//! Each test creates its own namespace and names its limiters after it, so
//! tests can run in parallel against one cluster.

#[path = "../common/mod.rs"]
mod common;

mod namespace;
mod operator;
mod wait;

mod limiter_tests;

pub use namespace::*;
pub use operator::*;
pub use wait::*;
