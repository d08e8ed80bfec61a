//! JSON-over-REST control-plane adapter.
//!
//! Resources live at `{endpoint}/resources/{kind}/{name}`. Status codes are
//! classified here so nothing above this module sees HTTP details.

use async_trait::async_trait;
use launchpad_core::provider::{
    ProviderAdapter, ProviderError, ProviderResult, RemoteRecord, ResourceRequest,
};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Serialize)]
struct ResourceBody<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_id: Option<&'a str>,
    attributes: &'a BTreeMap<String, String>,
}

/// Control-plane adapter speaking JSON over HTTP.
pub struct HttpProvider {
    client: reqwest::Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpProvider {
    pub fn new(endpoint: Url) -> ProviderResult<Self> {
        if endpoint.cannot_be_a_base() {
            return Err(ProviderError::Unknown(format!(
                "provider endpoint {} cannot be a base URL",
                endpoint
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("launchpad")
            .build()
            .map_err(|e| ProviderError::Unknown(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("resources").extend(segments);
        }
        url
    }

    fn collection_url(&self, request: &ResourceRequest) -> Url {
        self.url(&[request.key.kind.as_str()])
    }

    fn resource_url(&self, request: &ResourceRequest) -> Url {
        self.url(&[request.key.kind.as_str(), &request.key.name])
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn body<'a>(request: &'a ResourceRequest) -> ResourceBody<'a> {
        ResourceBody {
            name: &request.key.name,
            remote_id: request.remote_id.as_deref(),
            attributes: &request.attributes,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> ProviderResult<Response> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| ProviderError::Unknown(format!("request failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify(status, text))
    }

    async fn record(&self, builder: reqwest::RequestBuilder) -> ProviderResult<RemoteRecord> {
        self.send(builder)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Unknown(format!("invalid response body: {e}")))
    }
}

/// Map a failed HTTP status to the provider taxonomy.
pub fn classify(status: StatusCode, body: String) -> ProviderError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::Throttled(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::NotAuthorized(detail),
        StatusCode::NOT_FOUND => ProviderError::NotFound(detail),
        StatusCode::CONFLICT => ProviderError::Conflict(detail),
        _ => ProviderError::Unknown(detail),
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let url = self.collection_url(request);
        debug!(resource = %request.key, %url, "POST");
        self.record(
            self.client
                .post(url)
                .header(IDEMPOTENCY_HEADER, &request.idempotency_token)
                .json(&Self::body(request)),
        )
        .await
    }

    async fn read(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let url = self.resource_url(request);
        debug!(resource = %request.key, %url, "GET");
        self.record(self.client.get(url)).await
    }

    async fn update(&self, request: &ResourceRequest) -> ProviderResult<RemoteRecord> {
        let url = self.resource_url(request);
        debug!(resource = %request.key, %url, "PUT");
        self.record(
            self.client
                .put(url)
                .header(IDEMPOTENCY_HEADER, &request.idempotency_token)
                .json(&Self::body(request)),
        )
        .await
    }

    async fn delete(&self, request: &ResourceRequest) -> ProviderResult<()> {
        let url = self.resource_url(request);
        debug!(resource = %request.key, %url, "DELETE");
        self.send(self.client.delete(url)).await.map(|_| ())
    }
}
