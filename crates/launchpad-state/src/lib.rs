//! State and secret stores for Launchpad.

pub mod error;
pub mod file;
pub mod memory;
pub mod secrets;

pub use error::{StateError, StateResult};
pub use file::FileStateStore;
pub use memory::MemoryStateStore;
pub use secrets::{EnvSecretStore, StaticSecretStore};
