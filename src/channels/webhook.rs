//! Generic webhook delivery adapter
//!
//! Delivers a formatted payload as a JSON POST to a configured endpoint,
//! with optional bearer auth and custom headers. This is the in-tree
//! [`ChannelAdapter`]; platform-specific adapters live with their
//! integrations and follow the same contract.
//!
//! The adapter performs exactly one attempt per `send` call and classifies
//! the outcome into transient or permanent [`DeliveryError`]s; the
//! orchestrator owns the retry loop.

use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::time::Duration;

use super::{ChannelAdapter, DeliveryAck, DeliveryError, DeliveryResult};
use crate::config::ChannelConfig;
use crate::content::ContentPayload;
use async_trait::async_trait;

/// Webhook adapter configuration
#[derive(Debug, Clone)]
pub struct WebhookAdapterConfig {
    /// Channel name this adapter serves
    pub channel: String,

    /// Endpoint URL for JSON POSTs
    pub url: String,

    /// Optional bearer token
    pub auth_token: Option<String>,

    /// Extra headers sent with every request
    pub headers: HashMap<String, String>,

    /// Request timeout
    pub timeout: Duration,
}

impl WebhookAdapterConfig {
    /// Build an adapter config from a channel's engine configuration.
    ///
    /// The `token` credential, when present, becomes the bearer token;
    /// every other credential is passed as an `X-`-prefixed header.
    pub fn from_channel(channel: &ChannelConfig, timeout: Duration) -> Result<Self, DeliveryError> {
        let url = channel
            .endpoint
            .clone()
            .ok_or_else(|| DeliveryError::Unavailable(format!("channel {} has no endpoint", channel.name)))?;

        let mut headers = HashMap::new();
        let mut auth_token = None;
        for (key, value) in &channel.credentials {
            if key == "token" {
                auth_token = Some(value.clone());
            } else {
                headers.insert(format!("X-{key}"), value.clone());
            }
        }

        Ok(Self {
            channel: channel.name.clone(),
            url,
            auth_token,
            headers,
            timeout,
        })
    }

    /// Validate the endpoint URL shape
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }
        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// JSON-POST delivery adapter
pub struct WebhookAdapter {
    config: WebhookAdapterConfig,
    client: Client,
}

impl WebhookAdapter {
    /// Create a new webhook adapter
    pub fn new(config: WebhookAdapterConfig) -> Result<Self, DeliveryError> {
        config
            .validate()
            .map_err(DeliveryError::Unavailable)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(DeliveryError::Http)?;

        Ok(Self { config, client })
    }

    /// Endpoint URL this adapter posts to
    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn build_payload(&self, content: &ContentPayload) -> serde_json::Value {
        serde_json::json!({
            "channel": self.config.channel,
            "text": content.text,
            "link_url": content.link_url,
            "meta_title": content.meta_title,
            "meta_description": content.meta_description,
            "image_path": content
                .media
                .as_ref()
                .and_then(|m| m.image_path.as_ref())
                .map(|p| p.display().to_string()),
        })
    }

    fn classify_status(status: StatusCode, body: String) -> DeliveryError {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return DeliveryError::Throttled;
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return DeliveryError::BadCredentials;
        }
        if status.is_server_error() {
            return DeliveryError::Server(status.as_u16());
        }
        DeliveryError::Rejected {
            status: status.as_u16(),
            message: body,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn name(&self) -> &str {
        &self.config.channel
    }

    async fn send(&self, content: &ContentPayload) -> DeliveryResult {
        let payload = self.build_payload(content);

        let mut request = self.client.post(&self.config.url);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let response = request.json(&payload).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout
            } else {
                DeliveryError::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            let post_id = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|v| v.get("id").and_then(|id| id.as_str().map(str::to_string)));

            tracing::info!(
                channel = %self.config.channel,
                url = %self.config.url,
                status = %status,
                "Webhook delivered"
            );

            let mut ack = DeliveryAck::new(self.config.channel.clone());
            if let Some(id) = post_id {
                ack = ack.with_post_id(id);
            }
            return Ok(ack);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(Self::classify_status(status, body))
    }
}
