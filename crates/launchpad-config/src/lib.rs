//! KDL manifest parsing for Launchpad.
//!
//! This crate handles parsing of:
//! - The deployment manifest (launchpad.kdl): settings and resources
//! - Variable interpolation

pub mod error;
pub mod manifest;
pub mod settings;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use manifest::{Manifest, load_manifest, parse_manifest};
pub use settings::Settings;
pub use variables::VariableContext;
