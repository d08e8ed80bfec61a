//! Provider adapter trait and failure taxonomy.
//!
//! A provider adapter translates one reconciliation operation into a call
//! against the cloud control plane. Failures are classified here, at the
//! boundary, so callers never inspect transport-specific errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::resource::ResourceKey;

/// Classified failure from the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("throttled: {0}")]
    Throttled(String),

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Only throttling is transient; everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Throttled(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Throttled(_) => "throttled",
            ProviderError::NotAuthorized(_) => "not_authorized",
            ProviderError::Conflict(_) => "conflict",
            ProviderError::NotFound(_) => "not_found",
            ProviderError::Unknown(_) => "unknown",
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// What is sent to the provider for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub key: ResourceKey,
    /// Attributes with all references resolved.
    pub attributes: BTreeMap<String, String>,
    /// Remote identity for update/delete/read of an existing resource.
    pub remote_id: Option<String>,
    pub idempotency_token: String,
}

impl ResourceRequest {
    pub fn new(key: ResourceKey, attributes: BTreeMap<String, String>) -> Self {
        let idempotency_token = idempotency_token(&key, &attributes);
        Self {
            key,
            attributes,
            remote_id: None,
            idempotency_token,
        }
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }
}

/// Materialized remote resource as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub remote_id: String,
    /// Attributes the remote resource was configured with.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Provider-assigned outputs (ARNs, URIs, endpoints).
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Provider-confirmed readiness.
    pub ready: bool,
}

impl RemoteRecord {
    /// Whether this remote resource already matches `request`.
    pub fn is_equivalent(&self, request: &ResourceRequest) -> bool {
        self.attributes == request.attributes
    }
}

/// SHA-256 over identity and attributes, stable across processes.
pub fn idempotency_token(key: &ResourceKey, attributes: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_string().as_bytes());
    for (name, value) in attributes {
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Capability interface against the cloud control plane.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Create a resource.
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord>;

    /// Read the current remote state; `NotFound` if it does not exist.
    async fn read(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord>;

    /// Update an existing resource in place.
    async fn update(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord>;

    /// Delete an existing resource.
    async fn delete(&self, request: &ResourceRequest) -> ProviderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn token_depends_on_identity_and_attributes() {
        let key = ResourceKey::new(ResourceKind::Registry, "images");
        let a = idempotency_token(&key, &attrs(&[("scan", "true")]));
        let b = idempotency_token(&key, &attrs(&[("scan", "true")]));
        let c = idempotency_token(&key, &attrs(&[("scan", "false")]));
        let other = ResourceKey::new(ResourceKind::Registry, "cache");
        let d = idempotency_token(&other, &attrs(&[("scan", "true")]));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn token_separates_name_and_value() {
        let key = ResourceKey::new(ResourceKind::Bucket, "artifacts");
        let a = idempotency_token(&key, &attrs(&[("ab", "c")]));
        let b = idempotency_token(&key, &attrs(&[("a", "bc")]));
        assert_ne!(a, b);
    }

    #[test]
    fn only_throttling_is_retryable() {
        assert!(ProviderError::Throttled("slow down".into()).is_retryable());
        assert!(!ProviderError::Conflict("exists".into()).is_retryable());
        assert!(!ProviderError::NotAuthorized("denied".into()).is_retryable());
        assert!(!ProviderError::NotFound("gone".into()).is_retryable());
        assert!(!ProviderError::Unknown("boom".into()).is_retryable());
    }
}
