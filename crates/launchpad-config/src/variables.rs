//! `${...}` interpolation in manifest values.
//!
//! | form                      | value                                 |
//! |---------------------------|---------------------------------------|
//! | `${settings.name}`        | a field of the `settings` block       |
//! | `${env.NAME}`             | process environment                   |
//! | `${name}`                 | an entry of the `variables` block     |
//! | `${date}`, `${timestamp}` | load time, fixed for the whole manifest |
//!
//! Three-part references such as `${registry.images.uri}` never match and are
//! left in place for apply-time resolution.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

/// Values visible to `${...}` while a manifest loads.
#[derive(Debug, Clone)]
pub struct VariableContext {
    settings: HashMap<String, String>,
    env: HashMap<String, String>,
    custom: HashMap<String, String>,
    loaded_at: DateTime<Utc>,
}

impl Default for VariableContext {
    fn default() -> Self {
        Self {
            settings: HashMap::new(),
            env: HashMap::new(),
            custom: HashMap::new(),
            loaded_at: Utc::now(),
        }
    }
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_process_env() -> Self {
        Self {
            env: std::env::vars().collect(),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_setting(name, value);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Define a `variables` block entry, replacing any earlier one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.custom.insert(name.into(), value.into());
    }

    pub fn set_setting(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.settings.insert(name.into(), value.into());
    }

    pub fn resolve(&self, name: &str) -> Option<String> {
        match name.split_once('.') {
            Some(("settings", field)) => self.settings.get(field).cloned(),
            Some(("env", var)) => self.env.get(var).cloned(),
            Some(_) => None,
            None => match name {
                "timestamp" => Some(self.loaded_at.timestamp().to_string()),
                "date" => Some(self.loaded_at.format("%Y-%m-%d").to_string()),
                _ => self.custom.get(name).cloned(),
            },
        }
    }

    /// Substitute every variable this context knows; unknown ones stay as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                self.resolve(&caps[1])
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Variables in `input` this context cannot resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}
