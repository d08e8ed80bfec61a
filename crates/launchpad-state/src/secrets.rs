//! Secret stores.

use async_trait::async_trait;
use launchpad_core::secret::{SecretRef, SecretStore, SecretValue};
use launchpad_core::{Error, Result};
use std::collections::HashMap;

/// Resolves `SecretRef`s from environment variables.
///
/// `github-token` is read from `GITHUB_TOKEN`, or `<PREFIX>_GITHUB_TOKEN`
/// when a prefix is set.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    pub fn var_name(&self, secret: &SecretRef) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, secret.env_var()),
            None => secret.env_var(),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get(&self, secret: &SecretRef) -> Result<SecretValue> {
        let var = self.var_name(secret);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => Ok(SecretValue::String(value)),
            _ => Err(Error::NotFound(format!("secret {secret} (expected in ${var})"))),
        }
    }
}

/// Fixed secrets held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<SecretRef, SecretValue>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets
            .insert(SecretRef::new(name), SecretValue::String(value.into()));
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get(&self, secret: &SecretRef) -> Result<SecretValue> {
        self.secrets
            .get(secret)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("secret {secret}")))
    }
}
