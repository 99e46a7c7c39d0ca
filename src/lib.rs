//! citycast - Rate-limited multi-platform broadcast engine
//!
//! Takes one content item and dispatches it across every configured
//! outbound channel, with per-channel validation, formatting, admission
//! control backed by a durable SQLite posting log, and delivery retries
//! with exponential backoff.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Engine and per-channel configuration
//! - [`content`] - Content payloads, validation and formatting
//! - [`limiter`] - Durable posting log and admission control
//! - [`channels`] - Channel adapter trait and concrete adapters
//! - [`broadcast`] - Fan-out orchestration with retry and cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use citycast::broadcast::BroadcastOrchestrator;
//! use citycast::channels::ChannelRegistry;
//! use citycast::config::EngineConfig;
//! use citycast::content::{ContentClass, ContentPayload};
//! use citycast::limiter::AdmissionController;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(EngineConfig::from_file("config.toml")?);
//!     let limiter = Arc::new(AdmissionController::open(&config.engine.database_path)?);
//!     let registry = ChannelRegistry::new();
//!     let orchestrator = BroadcastOrchestrator::new(config, registry, limiter);
//!
//!     let payload = ContentPayload::new("Severe weather expected tonight.");
//!     let cancel = CancellationToken::new();
//!     let results = orchestrator
//!         .broadcast(&payload, ContentClass::WeatherAlert, &cancel)
//!         .await;
//!     for result in results.values() {
//!         println!("{result}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod channels;
pub mod config;
pub mod content;
pub mod error;
pub mod limiter;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::broadcast::{
        BroadcastOrchestrator, DispatchStatus, FailureKind, PostResult, RetryPolicy, SkipReason,
    };
    pub use crate::channels::{ChannelAdapter, ChannelRegistry, DeliveryAck, DeliveryError};
    pub use crate::config::{ChannelConfig, EngineConfig, MediaRules, RateLimitConfig};
    pub use crate::content::{
        ContentClass, ContentFormatter, ContentPayload, ContentValidator, MediaRef,
        ValidationError,
    };
    pub use crate::error::{Error, Result};
    pub use crate::limiter::{AdmissionController, AdmissionPermit, PostRecord};
}

// Direct re-exports for convenience
pub use content::{ContentClass, ContentPayload};
pub use error::{Error, Result};
