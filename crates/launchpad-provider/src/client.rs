//! Provider client: the only path from the reconciler to an adapter.

use launchpad_core::provider::{
    ProviderAdapter, ProviderError, ProviderResult, RemoteRecord, ResourceRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

/// Bounded polling of a resource until the provider reports it ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_polls: u32,
    pub interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_polls: 60,
            interval: Duration::from_secs(5),
        }
    }
}

/// Wraps an adapter with throttling backoff, idempotent create and
/// readiness polling.
#[derive(Clone)]
pub struct ProviderClient {
    adapter: Arc<dyn ProviderAdapter>,
    retry: RetryPolicy,
    readiness: ReadinessPolicy,
}

impl ProviderClient {
    pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
        Self {
            adapter,
            retry: RetryPolicy::default(),
            readiness: ReadinessPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Create a resource unless an equivalent one already exists.
    ///
    /// An existing resource with different attributes is a `Conflict`. The
    /// returned record is ready.
    pub async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let target = request.key.to_string();
        match self.read(request).await {
            Ok(existing) if existing.is_equivalent(request) => {
                info!(resource = %target, remote_id = %existing.remote_id, "reusing existing remote resource");
                return self.wait_until_ready(request, existing).await;
            }
            Ok(existing) => {
                return Err(ProviderError::Conflict(format!(
                    "{} already exists as {} with different attributes",
                    target, existing.remote_id
                )));
            }
            Err(ProviderError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let adapter = &self.adapter;
        let record = self
            .retry
            .run("create", &target, move || adapter.create(request))
            .await?;
        debug!(resource = %target, remote_id = %record.remote_id, ready = record.ready, "created");
        self.wait_until_ready(request, record).await
    }

    pub async fn read(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let adapter = &self.adapter;
        self.retry
            .run("read", &request.key.to_string(), move || adapter.read(request))
            .await
    }

    /// Update a resource in place. The returned record is ready.
    pub async fn update(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let target = request.key.to_string();
        let adapter = &self.adapter;
        let record = self
            .retry
            .run("update", &target, move || adapter.update(request))
            .await?;
        debug!(resource = %target, remote_id = %record.remote_id, ready = record.ready, "updated");
        self.wait_until_ready(request, record).await
    }

    /// Delete a resource. A resource that is already gone counts as deleted.
    pub async fn delete(&self, request: &ResourceRequest) -> ProviderResult<()> {
        let target = request.key.to_string();
        let adapter = &self.adapter;
        match self.retry.run("delete", &target, move || adapter.delete(request)).await {
            Err(ProviderError::NotFound(_)) => {
                warn!(resource = %target, "resource already absent");
                Ok(())
            }
            other => other,
        }
    }

    async fn wait_until_ready(
        &self,
        request: &ResourceRequest,
        mut record: RemoteRecord,
    ) -> ProviderResult<RemoteRecord> {
        let mut polls = 0;
        let request = if request.remote_id.is_none() {
            request.clone().with_remote_id(record.remote_id.clone())
        } else {
            request.clone()
        };

        while !record.ready {
            if polls >= self.readiness.max_polls {
                return Err(ProviderError::Unknown(format!(
                    "{} not ready after {} polls",
                    request.key, polls
                )));
            }
            tokio::time::sleep(self.readiness.interval).await;
            polls += 1;
            debug!(resource = %request.key, poll = polls, "waiting for readiness");
            record = self.read(&request).await?;
        }
        Ok(record)
    }
}
