//! Secret storage abstraction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::Result;

/// Name of a secret, as referenced from the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretRef(String);

impl SecretRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Environment variable holding this secret: upper-snake case of the name.
    pub fn env_var(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A secret value (can be a single string or key-value pairs).
#[derive(Clone, PartialEq, Eq)]
pub enum SecretValue {
    String(String),
    Map(HashMap<String, String>),
}

impl SecretValue {
    /// Get the value as a string (first value for maps).
    pub fn as_string(&self) -> Option<&str> {
        match self {
            SecretValue::String(s) => Some(s),
            SecretValue::Map(m) => m.values().next().map(|s| s.as_str()),
        }
    }

    /// Get a specific key from a map secret.
    pub fn get(&self, key: &str) -> Option<&str> {
        match self {
            SecretValue::String(s) if key.is_empty() => Some(s),
            SecretValue::Map(m) => m.get(key).map(|s| s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::String(_) => f.write_str("SecretValue::String(***)"),
            SecretValue::Map(m) => {
                let mut keys: Vec<_> = m.keys().collect();
                keys.sort();
                write!(f, "SecretValue::Map({keys:?})")
            }
        }
    }
}

/// Read-only secret backend.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Get a secret by reference. `Error::NotFound` if it does not exist.
    async fn get(&self, secret: &SecretRef) -> Result<SecretValue>;

    /// Get a specific key from a secret.
    async fn get_key(&self, secret: &SecretRef, key: &str) -> Result<String> {
        let value = self.get(secret).await?;
        value
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| crate::Error::NotFound(format!("secret {secret} has no key `{key}`")))
    }
}
