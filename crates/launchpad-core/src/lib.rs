//! Core domain types and traits for Launchpad.
//!
//! This crate contains:
//! - Resource declarations and the dependency graph
//! - Reconciliation operations and plans
//! - `${kind.name.output}` attribute references
//! - The provider adapter trait and its error taxonomy
//! - Pipeline run, image and source types
//! - Executor, service controller and secret store seams
//! - Applied state snapshots

pub mod error;
pub mod executor;
pub mod graph;
pub mod id;
pub mod image;
pub mod operation;
pub mod pipeline;
pub mod provider;
pub mod reference;
pub mod resource;
pub mod secret;
pub mod service;
pub mod source;
pub mod state;

pub use error::{Error, Result};
pub use graph::ResourceGraph;
pub use id::Uid;
pub use resource::{LifecycleState, Resource, ResourceKey, ResourceKind};
