//! HTTP client for the research service
//!
//! Covers the request/response endpoints and the health probes. The
//! streaming endpoint itself is opened by [`crate::stream::StreamSession`].

use crate::config::AppConfig;
use crate::health::{Probe, ProbeResult, ServiceId};
use crate::settings::{AgentModelKey, ModelConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

/// API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Server error: {status} - {body}")]
    ServerError { status: u16, body: String },
}

/// Body of the streaming research request
#[derive(Debug, Clone, Serialize)]
pub struct ResearchRequest {
    pub query: String,
    pub model_configs: BTreeMap<AgentModelKey, ModelConfig>,
}

/// Search credentials forwarded to the service for the current session
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeys {
    pub google_api_key: String,
    pub google_cx_id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: String,
}

pub struct ApiClient {
    client: Client,
    api_url: String,
    llm_api_url: String,
    backend_timeout: Duration,
    llm_timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &AppConfig) -> Self {
        let client = match Client::builder()
            .user_agent(format!("prism/{}", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("HTTP client setup failed, using defaults: {}", e);
                Client::new()
            }
        };

        Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            llm_api_url: config.llm_api_url.trim_end_matches('/').to_string(),
            backend_timeout: Duration::from_millis(config.health.backend_timeout_ms),
            llm_timeout: Duration::from_millis(config.health.llm_timeout_ms),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn research_stream_url(&self) -> String {
        format!("{}/v1/prism/research/stream", self.api_url)
    }

    /// Push search credentials to the service; returns its confirmation message.
    pub async fn update_api_keys(&self, keys: &ApiKeys) -> Result<String, ApiError> {
        let url = format!("{}/v1/config/keys", self.api_url);
        let response = self.client.post(&url).json(keys).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::ServerError { status, body });
        }

        let body: MessageResponse = response.json().await?;
        tracing::info!(message = %body.message, "API keys updated");
        Ok(body.message)
    }

    pub fn backend_probe(&self) -> HttpProbe {
        HttpProbe::new(
            ServiceId::Backend,
            self.client.clone(),
            format!("{}/health", self.api_url),
            self.backend_timeout,
        )
    }

    pub fn llm_probe(&self) -> HttpProbe {
        HttpProbe::new(
            ServiceId::Llm,
            self.client.clone(),
            format!("{}/models", self.llm_api_url),
            self.llm_timeout,
        )
    }
}

/// GET-based liveness probe. Any 2xx response within the timeout is reachable.
pub struct HttpProbe {
    service: ServiceId,
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(service: ServiceId, client: Client, url: String, timeout: Duration) -> Self {
        Self {
            service,
            client,
            url,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn service(&self) -> ServiceId {
        self.service
    }

    async fn check(&self) -> ProbeResult {
        let start = Instant::now();
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                ProbeResult::reachable(start.elapsed().as_millis() as u64)
            }
            Ok(response) => {
                tracing::debug!(
                    service = %self.service,
                    status = %response.status(),
                    "Probe got error status"
                );
                ProbeResult::unreachable()
            }
            Err(e) => {
                tracing::debug!(service = %self.service, error = %e, "Probe failed");
                ProbeResult::unreachable()
            }
        }
    }
}
