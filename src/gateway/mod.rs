//! Gateway - Communication with the hosted LLM gateway function
//!
//! Responses are modelled as a tagged `GatewayOutcome` so callers decide on
//! retries and fallbacks from the status class instead of probing ad hoc
//! response shapes.

mod retry;

pub use retry::RetryPolicy;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DashConfig;
use crate::error::Result;

/// One message in the gateway conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub role: String,
    pub content: String,
}

impl GatewayMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request body accepted by the gateway function
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayRequest {
    pub messages: Vec<GatewayMessage>,
    /// System prompt
    pub context: String,
    pub model: String,
}

/// Why a gateway call did not produce content
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayFailure {
    /// HTTP status, absent for transport errors
    pub status: Option<u16>,
    pub message: String,
}

impl GatewayFailure {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Only rate limits and server errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self.status, Some(429) | Some(500..=599))
    }
}

/// Result of one gateway call
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Success {
        content: String,
        usage: Option<serde_json::Value>,
    },
    Failure(GatewayFailure),
}

impl GatewayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayOutcome::Success { .. })
    }
}

/// A general-purpose LLM backend
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, request: &GatewayRequest) -> GatewayOutcome;
}

#[derive(Deserialize)]
struct GatewayResponseBody {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    usage: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Gateway reached over HTTP with a bearer key
#[derive(Clone)]
pub struct HttpGateway {
    url: String,
    api_key: String,
    http_client: Client,
}

impl HttpGateway {
    pub fn new(config: &DashConfig) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout()).build()?;

        Ok(Self {
            url: config.gateway_url.clone(),
            api_key: config.gateway_api_key.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn complete(&self, request: &GatewayRequest) -> GatewayOutcome {
        debug!(model = %request.model, messages = request.messages.len(), "Calling LLM gateway");

        let mut builder = self.http_client.post(&self.url).json(request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                return GatewayOutcome::Failure(GatewayFailure::new(
                    e.status().map(|s| s.as_u16()),
                    format!("Gateway request failed: {}", e),
                ))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Gateway returned error status");
            return GatewayOutcome::Failure(GatewayFailure::new(Some(status.as_u16()), error_text));
        }

        match response.json::<GatewayResponseBody>().await {
            Ok(GatewayResponseBody {
                content: Some(content),
                usage,
                ..
            }) => GatewayOutcome::Success { content, usage },
            Ok(GatewayResponseBody { error, .. }) => GatewayOutcome::Failure(GatewayFailure::new(
                None,
                error.unwrap_or_else(|| "Gateway response had no content".to_string()),
            )),
            Err(e) => GatewayOutcome::Failure(GatewayFailure::new(
                None,
                format!("Failed to parse gateway response: {}", e),
            )),
        }
    }
}
