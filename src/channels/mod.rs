//! Outbound channel capabilities
//!
//! A [`ChannelAdapter`] is, to the engine, an opaque capability: it can
//! deliver one formatted payload and report how that went. Adapters are
//! possibly slow, fallible, and side-effecting at most once per successful
//! call; the engine never reimplements a platform's wire protocol, it only
//! classifies the outcome. New channels are added by registering an
//! implementation in the [`ChannelRegistry`], never by branching on a
//! channel-name string.

pub mod webhook;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::content::ContentPayload;

pub use webhook::{WebhookAdapter, WebhookAdapterConfig};

/// Result type for channel operations
pub type DeliveryResult = Result<DeliveryAck, DeliveryError>;

/// Errors a channel adapter can report for one send
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// HTTP transport failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Request timed out
    #[error("Request timeout")]
    Timeout,

    /// Server-side failure (5xx-equivalent)
    #[error("Server error: {0}")]
    Server(u16),

    /// The platform itself is throttling us
    #[error("Platform rate limit hit")]
    Throttled,

    /// The platform rejected the post (4xx-equivalent)
    #[error("Post rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Credentials are missing or malformed
    #[error("Bad or missing credentials")]
    BadCredentials,

    /// Channel temporarily unavailable
    #[error("Channel temporarily unavailable: {0}")]
    Unavailable(String),

    /// Generic adapter error
    #[error("Channel error: {0}")]
    Other(String),
}

impl DeliveryError {
    /// Whether a retry of the same send could reasonably succeed.
    ///
    /// Timeouts, transport failures, throttling and 5xx responses are
    /// transient; rejections and credential problems are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_builder(),
            Self::Timeout | Self::Server(_) | Self::Throttled | Self::Unavailable(_) => true,
            Self::Rejected { .. } | Self::BadCredentials | Self::Other(_) => false,
        }
    }
}

/// Confirmation of one successful delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAck {
    /// Channel that delivered the post
    pub channel: String,

    /// Platform-assigned post identifier, when the platform returns one
    pub post_id: Option<String>,

    /// Delivery timestamp
    pub delivered_at: DateTime<Utc>,
}

impl DeliveryAck {
    /// Create an ack for a channel
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            post_id: None,
            delivered_at: Utc::now(),
        }
    }

    /// Attach the platform-assigned post id
    pub fn with_post_id(mut self, id: impl Into<String>) -> Self {
        self.post_id = Some(id.into());
        self
    }
}

/// Capability interface for one outbound channel
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel name, matching its entry in the configuration
    fn name(&self) -> &str;

    /// Deliver one formatted payload.
    ///
    /// At-most-once per successful call is the adapter's contract; the
    /// engine does not de-duplicate.
    async fn send(&self, content: &ContentPayload) -> DeliveryResult;
}

/// Static registry mapping channel names to adapter capabilities
#[derive(Default, Clone)]
pub struct ChannelRegistry {
    adapters: HashMap<String, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own name
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Look up an adapter by channel name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Registered channel names
    pub fn names(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
