//! Broadcast orchestration across outbound channels
//!
//! For one content item the [`BroadcastOrchestrator`] fans out across every
//! configured channel concurrently, walking each dispatch through
//! eligibility, validation, admission, formatting and delivery with
//! retry-and-backoff. Channels fail independently; one channel's retry
//! loop never blocks another's dispatch, and the aggregate result is
//! returned only once every channel has reached a terminal state.
//!
//! A [`CancellationToken`] aborts in-flight backoff sleeps and adapter
//! calls promptly; cancelled channels report a `Cancelled` failure rather
//! than being dropped from the result map.

pub mod retry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::channels::{ChannelAdapter, ChannelRegistry};
use crate::config::{ChannelConfig, EngineConfig};
use crate::content::{ContentClass, ContentFormatter, ContentPayload, ContentValidator};
use crate::limiter::AdmissionController;

pub use retry::RetryPolicy;

/// Why a dispatch was skipped without attempting delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Channel disabled or content class not allowed
    NotEligible,
    /// Admission control denied the post
    RateLimited,
    /// Channel enabled but its configuration is unusable
    Misconfigured,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotEligible => "not eligible",
            Self::RateLimited => "rate_limited",
            Self::Misconfigured => "misconfigured",
        }
    }
}

/// Why a dispatch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Content violated the channel's structural contract
    Validation(Vec<String>),
    /// Delivery failed (after retries, when the error was transient)
    Delivery { message: String, transient: bool },
    /// The broadcast was cancelled before this channel finished
    Cancelled,
}

/// Terminal state of one (content item, channel) dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Delivered,
    Skipped(SkipReason),
    Failed(FailureKind),
}

/// Per-channel outcome of a broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostResult {
    /// Channel this result belongs to
    pub channel: String,

    /// Terminal dispatch state
    pub status: DispatchStatus,

    /// Number of delivery attempts made (0 when skipped before sending)
    pub attempts: u32,
}

impl PostResult {
    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Delivered
    }

    fn skipped(channel: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            channel: channel.into(),
            status: DispatchStatus::Skipped(reason),
            attempts: 0,
        }
    }
}

impl std::fmt::Display for PostResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.status {
            DispatchStatus::Delivered => {
                write!(f, "[DELIVERED] {} (attempts: {})", self.channel, self.attempts)
            }
            DispatchStatus::Skipped(reason) => {
                write!(f, "[SKIPPED] {}: {}", self.channel, reason.as_str())
            }
            DispatchStatus::Failed(FailureKind::Validation(errors)) => {
                write!(f, "[FAILED] {}: validation: {}", self.channel, errors.join("; "))
            }
            DispatchStatus::Failed(FailureKind::Delivery { message, .. }) => {
                write!(
                    f,
                    "[FAILED] {}: {} (attempts: {})",
                    self.channel, message, self.attempts
                )
            }
            DispatchStatus::Failed(FailureKind::Cancelled) => {
                write!(f, "[FAILED] {}: cancelled", self.channel)
            }
        }
    }
}

/// Broadcast statistics (thread-safe)
#[derive(Debug, Default)]
pub struct BroadcastStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
}

impl BroadcastStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, result: &PostResult) {
        match &result.status {
            DispatchStatus::Delivered => self.delivered.fetch_add(1, Ordering::Relaxed),
            DispatchStatus::Skipped(_) => self.skipped.fetch_add(1, Ordering::Relaxed),
            DispatchStatus::Failed(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Get snapshot of current stats
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of broadcast statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Top-level coordinator for one-item fan-out
pub struct BroadcastOrchestrator {
    config: Arc<EngineConfig>,
    registry: ChannelRegistry,
    limiter: Arc<AdmissionController>,
    formatter: Arc<ContentFormatter>,
    validator: ContentValidator,
    stats: Arc<BroadcastStats>,
}

impl BroadcastOrchestrator {
    pub fn new(
        config: Arc<EngineConfig>,
        registry: ChannelRegistry,
        limiter: Arc<AdmissionController>,
    ) -> Self {
        Self {
            config,
            registry,
            limiter,
            formatter: Arc::new(ContentFormatter::new()),
            validator: ContentValidator::new(),
            stats: BroadcastStats::new(),
        }
    }

    /// Replace the default formatter (custom tone table)
    pub fn with_formatter(mut self, formatter: ContentFormatter) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    /// Cumulative statistics across broadcasts
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Broadcast one content item to every configured channel.
    ///
    /// Returns a result for every channel in the configuration, delivered
    /// or not, once all dispatches are terminal.
    pub async fn broadcast(
        &self,
        payload: &ContentPayload,
        class: ContentClass,
        cancel: &CancellationToken,
    ) -> HashMap<String, PostResult> {
        let payload = Arc::new(payload.clone());
        let mut results = HashMap::new();
        let mut tasks: JoinSet<PostResult> = JoinSet::new();

        for channel in self.config.channels.values() {
            let name = channel.name.clone();

            if !channel.enabled || !channel.allowed_classes.contains(&class) {
                let result = PostResult::skipped(name.clone(), SkipReason::NotEligible);
                self.stats.record(&result);
                results.insert(name, result);
                continue;
            }

            if let Some(reason) = channel.config_error() {
                tracing::debug!(channel = %name, reason = %reason, "Skipping misconfigured channel");
                let result = PostResult::skipped(name.clone(), SkipReason::Misconfigured);
                self.stats.record(&result);
                results.insert(name, result);
                continue;
            }

            let Some(adapter) = self.registry.get(&name) else {
                tracing::warn!(channel = %name, "No adapter registered for channel");
                let result = PostResult::skipped(name.clone(), SkipReason::Misconfigured);
                self.stats.record(&result);
                results.insert(name, result);
                continue;
            };

            let dispatch = ChannelDispatch {
                channel: channel.clone(),
                adapter,
                limiter: Arc::clone(&self.limiter),
                formatter: Arc::clone(&self.formatter),
                validator: self.validator,
                policy: RetryPolicy::new(
                    channel.effective_max_retries(&self.config.engine),
                    channel.effective_base_delay(&self.config.engine),
                    std::time::Duration::from_secs(self.config.engine.retry_max_delay_secs),
                ),
                payload: Arc::clone(&payload),
                class,
                cancel: cancel.clone(),
            };
            tasks.spawn(dispatch.run());
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    self.stats.record(&result);
                    tracing::info!(
                        channel = %result.channel,
                        outcome = %result,
                        "Channel dispatch finished"
                    );
                    results.insert(result.channel.clone(), result);
                }
                Err(e) => {
                    // A panicked dispatch must not take the broadcast down.
                    tracing::error!(error = %e, "Channel dispatch task aborted");
                }
            }
        }

        results
    }
}

/// State for one dispatch task, owned by its spawned future
struct ChannelDispatch {
    channel: ChannelConfig,
    adapter: Arc<dyn ChannelAdapter>,
    limiter: Arc<AdmissionController>,
    formatter: Arc<ContentFormatter>,
    validator: ContentValidator,
    policy: RetryPolicy,
    payload: Arc<ContentPayload>,
    class: ContentClass,
    cancel: CancellationToken,
}

impl ChannelDispatch {
    async fn run(self) -> PostResult {
        let name = self.channel.name.clone();

        if self.cancel.is_cancelled() {
            return PostResult {
                channel: name,
                status: DispatchStatus::Failed(FailureKind::Cancelled),
                attempts: 0,
            };
        }

        let errors = self.validator.validate(&self.payload, &self.channel);
        if !errors.is_empty() {
            tracing::warn!(
                channel = %name,
                errors = ?errors,
                "Content validation failed"
            );
            return PostResult {
                channel: name,
                status: DispatchStatus::Failed(FailureKind::Validation(
                    errors.iter().map(ToString::to_string).collect(),
                )),
                attempts: 0,
            };
        }

        let Some(permit) = self
            .limiter
            .admit(&name, self.class, &self.channel.rate_limit)
            .await
        else {
            return PostResult::skipped(name, SkipReason::RateLimited);
        };

        let formatted = self.formatter.format(&self.payload, &self.channel);

        // Attempts are strictly sequential within this channel; siblings
        // run their own loops independently.
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let send_result = tokio::select! {
                result = self.adapter.send(&formatted) => result,
                _ = self.cancel.cancelled() => {
                    return PostResult {
                        channel: name,
                        status: DispatchStatus::Failed(FailureKind::Cancelled),
                        attempts,
                    };
                }
            };

            match send_result {
                Ok(ack) => {
                    if let Err(e) = self.limiter.commit(permit, ack.delivered_at).await {
                        // Delivery already happened; losing the record only
                        // loosens future admission, it cannot be unsent.
                        tracing::error!(
                            channel = %name,
                            error = %e,
                            "Delivered but failed to record post"
                        );
                    }
                    return PostResult {
                        channel: name,
                        status: DispatchStatus::Delivered,
                        attempts,
                    };
                }
                Err(e) if e.is_transient() && self.policy.allows_retry(attempts - 1) => {
                    let delay = self.policy.delay_for_attempt(attempts - 1);
                    tracing::warn!(
                        channel = %name,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient delivery failure, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            return PostResult {
                                channel: name,
                                status: DispatchStatus::Failed(FailureKind::Cancelled),
                                attempts,
                            };
                        }
                    }
                }
                Err(e) => {
                    let transient = e.is_transient();
                    let message = if transient {
                        format!("retries exhausted: {e}")
                    } else {
                        e.to_string()
                    };
                    tracing::error!(
                        channel = %name,
                        attempts,
                        transient,
                        error = %e,
                        "Delivery failed"
                    );
                    return PostResult {
                        channel: name,
                        status: DispatchStatus::Failed(FailureKind::Delivery { message, transient }),
                        attempts,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record_and_snapshot() {
        let stats = BroadcastStats::new();
        stats.record(&PostResult {
            channel: "a".to_string(),
            status: DispatchStatus::Delivered,
            attempts: 1,
        });
        stats.record(&PostResult::skipped("b", SkipReason::RateLimited));
        stats.record(&PostResult {
            channel: "c".to_string(),
            status: DispatchStatus::Failed(FailureKind::Cancelled),
            attempts: 2,
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.delivered, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_result_display() {
        let delivered = PostResult {
            channel: "microblog".to_string(),
            status: DispatchStatus::Delivered,
            attempts: 2,
        };
        assert_eq!(delivered.to_string(), "[DELIVERED] microblog (attempts: 2)");
        assert!(delivered.is_success());

        let skipped = PostResult::skipped("board", SkipReason::Misconfigured);
        assert_eq!(skipped.to_string(), "[SKIPPED] board: misconfigured");
        assert!(!skipped.is_success());
    }
}
