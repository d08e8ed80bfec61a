//! In-memory provider for local dry runs and tests.

use async_trait::async_trait;
use launchpad_core::provider::{
    ProviderAdapter, ProviderError, ProviderResult, RemoteRecord, ResourceRequest,
};
use launchpad_core::{ResourceKey, ResourceKind};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::Mutex;

/// Provider operation, used to target injected faults and inspect calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    Create,
    Read,
    Update,
    Delete,
}

/// A call observed by the in-memory provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub op: ProviderOp,
    pub key: ResourceKey,
    pub idempotency_token: String,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<ResourceKey, RemoteRecord>,
    faults: HashMap<(ResourceKey, ProviderOp), VecDeque<ProviderError>>,
    /// Reads remaining before a record reports ready.
    pending: HashMap<ResourceKey, u32>,
    calls: Vec<ProviderCall>,
    next_id: u64,
}

/// Keeps remote records in memory and synthesizes outputs.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `op` on `key` with `error`. Faults queue in order.
    pub async fn fail_next(&self, key: &ResourceKey, op: ProviderOp, error: ProviderError) {
        let mut inner = self.inner.lock().await;
        inner
            .faults
            .entry((key.clone(), op))
            .or_default()
            .push_back(error);
    }

    /// Report `key` as not ready until it has been read `reads` times after
    /// its next create or update.
    pub async fn ready_after(&self, key: &ResourceKey, reads: u32) {
        self.inner.lock().await.pending.insert(key.clone(), reads);
    }

    /// Seed a record that exists remotely but is not in any snapshot.
    pub async fn insert(&self, key: ResourceKey, record: RemoteRecord) {
        self.inner.lock().await.records.insert(key, record);
    }

    pub async fn record(&self, key: &ResourceKey) -> Option<RemoteRecord> {
        self.inner.lock().await.records.get(key).cloned()
    }

    /// Keys of every existing record.
    pub async fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.inner.lock().await.records.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every call made so far, in order.
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Calls of a single operation kind.
    pub async fn calls_of(&self, op: ProviderOp) -> Vec<ProviderCall> {
        self.calls()
            .await
            .into_iter()
            .filter(|call| call.op == op)
            .collect()
    }
}

impl Inner {
    fn begin(&mut self, op: ProviderOp, request: &ResourceRequest) -> ProviderResult<()> {
        self.calls.push(ProviderCall {
            op,
            key: request.key.clone(),
            idempotency_token: request.idempotency_token.clone(),
        });
        let fault = self
            .faults
            .get_mut(&(request.key.clone(), op))
            .and_then(VecDeque::pop_front);
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn materialize(&mut self, request: &ResourceRequest, remote_id: String) -> RemoteRecord {
        let ready = !self.pending.contains_key(&request.key);
        let record = RemoteRecord {
            outputs: outputs_for(&request.key, &remote_id),
            remote_id,
            attributes: request.attributes.clone(),
            ready,
        };
        self.records.insert(request.key.clone(), record.clone());
        record
    }
}

fn outputs_for(key: &ResourceKey, remote_id: &str) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::from([
        ("id".to_string(), remote_id.to_string()),
        (
            "arn".to_string(),
            format!("arn:launchpad:{}:{}", key.kind, key.name),
        ),
    ]);
    match key.kind {
        ResourceKind::Registry => {
            outputs.insert("uri".to_string(), format!("registry.local/{}", key.name));
        }
        ResourceKind::LoadBalancer => {
            outputs.insert("dns_name".to_string(), format!("{}.lb.local", key.name));
        }
        ResourceKind::Service | ResourceKind::Cluster => {
            outputs.insert("name".to_string(), key.name.clone());
        }
        _ => {}
    }
    outputs
}

#[async_trait]
impl ProviderAdapter for InMemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let mut inner = self.inner.lock().await;
        inner.begin(ProviderOp::Create, request)?;
        if inner.records.contains_key(&request.key) {
            return Err(ProviderError::Conflict(format!("{} already exists", request.key)));
        }
        inner.next_id += 1;
        let remote_id = format!("{}-{:04}", request.key.kind, inner.next_id);
        Ok(inner.materialize(request, remote_id))
    }

    async fn read(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let mut inner = self.inner.lock().await;
        inner.begin(ProviderOp::Read, request)?;
        if !inner.records.contains_key(&request.key) {
            return Err(ProviderError::NotFound(request.key.to_string()));
        }

        let became_ready = match inner.pending.get_mut(&request.key) {
            Some(remaining) if *remaining > 1 => {
                *remaining -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if became_ready {
            inner.pending.remove(&request.key);
        }

        let record = inner
            .records
            .get_mut(&request.key)
            .ok_or_else(|| ProviderError::NotFound(request.key.to_string()))?;
        if became_ready {
            record.ready = true;
        }
        Ok(record.clone())
    }

    async fn update(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let mut inner = self.inner.lock().await;
        inner.begin(ProviderOp::Update, request)?;
        let remote_id = inner
            .records
            .get(&request.key)
            .map(|record| record.remote_id.clone())
            .ok_or_else(|| ProviderError::NotFound(request.key.to_string()))?;
        Ok(inner.materialize(request, remote_id))
    }

    async fn delete(&self, request: &ResourceRequest) -> ProviderResult<()> {
        let mut inner = self.inner.lock().await;
        inner.begin(ProviderOp::Delete, request)?;
        inner.pending.remove(&request.key);
        inner
            .records
            .remove(&request.key)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(request.key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, attrs: &[(&str, &str)]) -> ResourceRequest {
        ResourceRequest::new(
            key.parse().unwrap(),
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn create_read_delete() {
        let provider = InMemoryProvider::new();
        let req = request("registry.images", &[("scan", "true")]);

        let created = provider.create(&req).await.unwrap();
        assert!(created.ready);
        assert_eq!(created.outputs["uri"], "registry.local/images");

        let read = provider.read(&req).await.unwrap();
        assert_eq!(read, created);

        provider.delete(&req).await.unwrap();
        assert!(matches!(provider.read(&req).await, Err(ProviderError::NotFound(_))));
    }

    #[tokio::test]
    async fn injected_faults_fire_once_in_order() {
        let provider = InMemoryProvider::new();
        let req = request("network.vpc", &[]);
        provider
            .fail_next(&req.key, ProviderOp::Create, ProviderError::Throttled("slow".into()))
            .await;
        provider
            .fail_next(&req.key, ProviderOp::Create, ProviderError::NotAuthorized("no".into()))
            .await;

        assert!(matches!(provider.create(&req).await, Err(ProviderError::Throttled(_))));
        assert!(matches!(provider.create(&req).await, Err(ProviderError::NotAuthorized(_))));
        assert!(provider.create(&req).await.is_ok());
        assert_eq!(provider.calls_of(ProviderOp::Create).await.len(), 3);
    }

    #[tokio::test]
    async fn pending_records_become_ready_after_reads() {
        let provider = InMemoryProvider::new();
        let req = request("cluster.main", &[]);
        provider.ready_after(&req.key, 2).await;

        assert!(!provider.create(&req).await.unwrap().ready);
        assert!(!provider.read(&req).await.unwrap().ready);
        assert!(provider.read(&req).await.unwrap().ready);
        assert!(provider.read(&req).await.unwrap().ready);
    }

    #[tokio::test]
    async fn create_of_existing_record_conflicts() {
        let provider = InMemoryProvider::new();
        let req = request("bucket.artifacts", &[]);
        provider.create(&req).await.unwrap();
        assert!(matches!(provider.create(&req).await, Err(ProviderError::Conflict(_))));
    }
}
