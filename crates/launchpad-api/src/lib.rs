//! Webhook server for Launchpad.
//!
//! Receives source-control pushes, queues pipeline runs for the watched
//! branch and reports the latest run.

pub mod bootstrap;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
