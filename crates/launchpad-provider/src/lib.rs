//! Provider adapters for Launchpad.
//!
//! This crate provides:
//! - [`ProviderClient`]: retry, idempotent create and readiness polling on
//!   top of any [`ProviderAdapter`](launchpad_core::provider::ProviderAdapter)
//! - [`HttpProvider`]: JSON over REST against a control-plane endpoint
//! - [`InMemoryProvider`]: local dry runs and tests, with fault injection

pub mod client;
pub mod http;
pub mod memory;
pub mod retry;

pub use client::{ProviderClient, ReadinessPolicy};
pub use http::HttpProvider;
pub use memory::{InMemoryProvider, ProviderCall, ProviderOp};
pub use retry::RetryPolicy;
