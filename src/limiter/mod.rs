//! Persisted admission control for outbound posts
//!
//! The [`AdmissionController`] is the only component of the engine with
//! durable state: an append-only SQLite log of post attempts, keyed by
//! `(channel, content_class, posted_at)`. Admission applies three rules
//! against that log:
//!
//! 1. the most recent record must be older than `min_interval_secs`,
//! 2. the trailing 1-hour window must hold fewer than `max_per_hour`
//!    records,
//! 3. the trailing 24-hour window must hold fewer than `max_per_day`
//!    records.
//!
//! Concurrent dispatches race between checking and recording: a record is
//! only appended after a channel adapter confirms delivery, so two
//! dispatches for the same `(channel, class)` could both observe an open
//! slot before either lands. [`AdmissionController::admit`] closes that
//! window with in-flight reservations: the check and the reservation
//! happen under one process-wide lock, and the returned
//! [`AdmissionPermit`] either commits a durable record after delivery or
//! releases the reservation on drop, so a failed send never consumes
//! quota.
//!
//! Failure semantics: if the backing store is unavailable, admission fails
//! closed (denied, with a logged warning) and never blocks indefinitely.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::content::ContentClass;
use crate::error::Result;

/// One row of the persisted post-history log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostRecord {
    pub channel: String,
    pub content_class: ContentClass,
    pub posted_at: DateTime<Utc>,
}

type PendingMap = HashMap<(String, ContentClass), u32>;

/// Persisted sliding-window + minimum-interval admission controller
pub struct AdmissionController {
    /// Serializes every window check and record append
    conn: Mutex<Connection>,

    /// In-flight admissions not yet committed to the log
    pending: Arc<StdMutex<PendingMap>>,
}

impl AdmissionController {
    /// Open (or create) the post-history database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let controller = Self {
            conn: Mutex::new(conn),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        };
        controller.create_schema()?;

        tracing::info!(path = %path.display(), "Post-history store initialized");
        Ok(controller)
    }

    /// Create an in-memory controller (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let controller = Self {
            conn: Mutex::new(conn),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        };
        controller.create_schema()?;
        Ok(controller)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .try_lock()
            .expect("no concurrent access during initialization");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS post_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel TEXT NOT NULL,
                content_class TEXT NOT NULL,
                posted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_post_history_key
                ON post_history(channel, content_class, posted_at);
            "#,
        )?;
        Ok(())
    }

    /// Advisory admission check at the current instant.
    ///
    /// Fails closed: a backend error is logged and reported as "denied".
    pub async fn can_post(
        &self,
        channel: &str,
        class: ContentClass,
        limits: &RateLimitConfig,
    ) -> bool {
        self.can_post_at(channel, class, limits, Utc::now()).await
    }

    /// Advisory admission check against an explicit instant
    pub async fn can_post_at(
        &self,
        channel: &str,
        class: ContentClass,
        limits: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> bool {
        let conn = self.conn.lock().await;
        match Self::check_windows(&conn, channel, class, limits, now) {
            Ok(decision) => decision.is_none(),
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    content_class = %class,
                    error = %e,
                    "Admission check failed; failing closed"
                );
                false
            }
        }
    }

    /// Serialized check-then-reserve used by the orchestrator.
    ///
    /// On admission, returns a permit holding an in-flight reservation that
    /// counts against the hourly/daily windows of subsequent checks until
    /// it is committed or dropped. Denial (rate limited or backend error)
    /// returns `None`.
    pub async fn admit(
        &self,
        channel: &str,
        class: ContentClass,
        limits: &RateLimitConfig,
    ) -> Option<AdmissionPermit> {
        let key = (channel.to_string(), class);
        let conn = self.conn.lock().await;
        let now = Utc::now();

        // An uncommitted in-flight post for the same key would land inside
        // any positive minimum interval, and counts toward both windows.
        let pending_count = {
            let pending = self.pending.lock().expect("pending lock poisoned");
            pending.get(&key).copied().unwrap_or(0)
        };
        if pending_count > 0 && limits.min_interval_secs > 0 {
            tracing::debug!(channel, content_class = %class, "In-flight post blocks admission");
            return None;
        }

        let denial = match Self::check_windows_with_pending(
            &conn,
            channel,
            class,
            limits,
            now,
            pending_count,
        ) {
            Ok(denial) => denial,
            Err(e) => {
                tracing::warn!(
                    channel = %channel,
                    content_class = %class,
                    error = %e,
                    "Admission check failed; failing closed"
                );
                return None;
            }
        };

        if let Some(reason) = denial {
            tracing::debug!(channel, content_class = %class, reason, "Admission denied");
            return None;
        }

        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            *pending.entry(key.clone()).or_insert(0) += 1;
        }

        Some(AdmissionPermit {
            pending: Arc::clone(&self.pending),
            key,
            committed: false,
        })
    }

    /// Append one record to the post-history log.
    ///
    /// Must only be called once a channel adapter has confirmed delivery;
    /// orchestrated dispatches go through [`AdmissionPermit::commit`],
    /// which enforces this ordering.
    pub async fn record_post(
        &self,
        channel: &str,
        class: ContentClass,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO post_history (channel, content_class, posted_at) VALUES (?1, ?2, ?3)",
            params![channel, class.as_str(), at.to_rfc3339()],
        )?;
        tracing::debug!(channel, content_class = %class, "Recorded post");
        Ok(())
    }

    /// Commit a permit: append the durable record and release the
    /// in-flight reservation.
    ///
    /// If the process dies between the adapter's confirmed delivery and
    /// this append, the post is not counted against future windows; the
    /// adapter's at-most-once contract covers duplicate suppression.
    pub async fn commit(&self, mut permit: AdmissionPermit, at: DateTime<Utc>) -> Result<()> {
        self.record_post(&permit.key.0, permit.key.1, at).await?;
        permit.committed = true;
        permit.release();
        Ok(())
    }

    /// Delete records older than the retention horizon, returning the
    /// number removed
    pub async fn prune_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM post_history WHERE posted_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        tracing::info!(days, removed, "Pruned post history");
        Ok(removed)
    }

    /// Most recent records, optionally filtered by channel
    pub async fn recent(&self, channel: Option<&str>, limit: usize) -> Result<Vec<PostRecord>> {
        let conn = self.conn.lock().await;

        let mut records = Vec::new();
        match channel {
            Some(channel) => {
                let mut stmt = conn.prepare(
                    "SELECT channel, content_class, posted_at FROM post_history
                     WHERE channel = ?1 ORDER BY posted_at DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![channel, limit as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT channel, content_class, posted_at FROM post_history
                     ORDER BY posted_at DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(params![limit as i64], row_to_record)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    }

    /// Total records in the log (for tests and the history command)
    pub async fn count(&self, channel: &str, class: ContentClass) -> Result<u32> {
        let conn = self.conn.lock().await;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM post_history WHERE channel = ?1 AND content_class = ?2",
            params![channel, class.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn check_windows(
        conn: &Connection,
        channel: &str,
        class: ContentClass,
        limits: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<Option<&'static str>> {
        Self::check_windows_with_pending(conn, channel, class, limits, now, 0)
    }

    /// Run the three admission rules; `Some(reason)` denies.
    fn check_windows_with_pending(
        conn: &Connection,
        channel: &str,
        class: ContentClass,
        limits: &RateLimitConfig,
        now: DateTime<Utc>,
        pending: u32,
    ) -> rusqlite::Result<Option<&'static str>> {
        let last: Option<String> = conn
            .query_row(
                "SELECT posted_at FROM post_history
                 WHERE channel = ?1 AND content_class = ?2
                 ORDER BY posted_at DESC LIMIT 1",
                params![channel, class.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(last) = last {
            if let Ok(last_time) = DateTime::parse_from_rfc3339(&last) {
                let elapsed = now.signed_duration_since(last_time.with_timezone(&Utc));
                if elapsed < ChronoDuration::seconds(limits.min_interval_secs as i64) {
                    return Ok(Some("minimum interval not met"));
                }
            }
        }

        let hour_ago = (now - ChronoDuration::hours(1)).to_rfc3339();
        let hourly: u32 = conn.query_row(
            "SELECT COUNT(*) FROM post_history
             WHERE channel = ?1 AND content_class = ?2 AND posted_at > ?3",
            params![channel, class.as_str(), hour_ago],
            |row| row.get(0),
        )?;
        if hourly + pending >= limits.max_per_hour {
            return Ok(Some("hourly limit reached"));
        }

        let day_ago = (now - ChronoDuration::days(1)).to_rfc3339();
        let daily: u32 = conn.query_row(
            "SELECT COUNT(*) FROM post_history
             WHERE channel = ?1 AND content_class = ?2 AND posted_at > ?3",
            params![channel, class.as_str(), day_ago],
            |row| row.get(0),
        )?;
        if daily + pending >= limits.max_per_day {
            return Ok(Some("daily limit reached"));
        }

        Ok(None)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<PostRecord> {
    let channel: String = row.get(0)?;
    let class: String = row.get(1)?;
    let posted_at: String = row.get(2)?;

    Ok(PostRecord {
        channel,
        content_class: class.parse().unwrap_or(ContentClass::News),
        posted_at: DateTime::parse_from_rfc3339(&posted_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// An admitted-but-unrecorded post slot.
///
/// Holds an in-flight reservation against the admission windows. Commit it
/// via [`AdmissionController::commit`] after confirmed delivery; dropping
/// it uncommitted releases the reservation.
#[must_use = "an unused permit blocks admission for its key until dropped"]
pub struct AdmissionPermit {
    pending: Arc<StdMutex<PendingMap>>,
    key: (String, ContentClass),
    committed: bool,
}

impl AdmissionPermit {
    /// Channel/class pair this permit was issued for
    pub fn key(&self) -> (&str, ContentClass) {
        (&self.key.0, self.key.1)
    }

    fn release(&mut self) {
        let mut pending = self.pending.lock().expect("pending lock poisoned");
        if let Some(count) = pending.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.remove(&self.key);
            }
        }
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if !self.committed {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(hour: u32, day: u32, interval: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_per_hour: hour,
            max_per_day: day,
            min_interval_secs: interval,
        }
    }

    #[tokio::test]
    async fn test_empty_log_admits() {
        let controller = AdmissionController::in_memory().unwrap();
        assert!(
            controller
                .can_post("microblog", ContentClass::Weather, &limits(10, 24, 300))
                .await
        );
    }

    #[tokio::test]
    async fn test_minimum_interval_blocks_then_opens() {
        let controller = AdmissionController::in_memory().unwrap();
        let lim = limits(10, 24, 300);
        let now = Utc::now();

        // Recorded 100s ago: inside the 300s interval.
        controller
            .record_post(
                "microblog",
                ContentClass::Weather,
                now - ChronoDuration::seconds(100),
            )
            .await
            .unwrap();
        assert!(
            !controller
                .can_post_at("microblog", ContentClass::Weather, &lim, now)
                .await
        );

        // The same record viewed 301s later no longer blocks.
        assert!(
            controller
                .can_post_at(
                    "microblog",
                    ContentClass::Weather,
                    &lim,
                    now + ChronoDuration::seconds(201)
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_hourly_limit() {
        let controller = AdmissionController::in_memory().unwrap();
        let lim = limits(3, 24, 0);
        let now = Utc::now();

        for i in 0..3 {
            controller
                .record_post(
                    "microblog",
                    ContentClass::News,
                    now - ChronoDuration::minutes(10 + i),
                )
                .await
                .unwrap();
        }

        assert!(
            !controller
                .can_post_at("microblog", ContentClass::News, &lim, now)
                .await
        );

        // Other keys are unaffected.
        assert!(
            controller
                .can_post_at("microblog", ContentClass::Weather, &lim, now)
                .await
        );
        assert!(
            controller
                .can_post_at("board", ContentClass::News, &lim, now)
                .await
        );
    }

    #[tokio::test]
    async fn test_daily_limit() {
        let controller = AdmissionController::in_memory().unwrap();
        let lim = limits(100, 5, 0);
        let now = Utc::now();

        for i in 0..5 {
            controller
                .record_post(
                    "board",
                    ContentClass::Earthquake,
                    now - ChronoDuration::hours(2 + i),
                )
                .await
                .unwrap();
        }

        assert!(
            !controller
                .can_post_at("board", ContentClass::Earthquake, &lim, now)
                .await
        );
    }

    #[tokio::test]
    async fn test_permit_blocks_and_drop_releases() {
        let controller = AdmissionController::in_memory().unwrap();
        let lim = limits(10, 24, 300);

        let permit = controller
            .admit("microblog", ContentClass::Weather, &lim)
            .await
            .expect("first admission");

        // In-flight reservation denies a concurrent admission.
        assert!(controller
            .admit("microblog", ContentClass::Weather, &lim)
            .await
            .is_none());

        drop(permit);

        // Capacity restored once the permit is released uncommitted.
        assert!(controller
            .admit("microblog", ContentClass::Weather, &lim)
            .await
            .is_some());
        assert_eq!(
            controller
                .count("microblog", ContentClass::Weather)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_commit_appends_record() {
        let controller = AdmissionController::in_memory().unwrap();
        let lim = limits(10, 24, 300);

        let permit = controller
            .admit("microblog", ContentClass::News, &lim)
            .await
            .unwrap();
        controller.commit(permit, Utc::now()).await.unwrap();

        assert_eq!(
            controller
                .count("microblog", ContentClass::News)
                .await
                .unwrap(),
            1
        );
        // The committed record now enforces the minimum interval.
        assert!(
            !controller
                .can_post("microblog", ContentClass::News, &lim)
                .await
        );
    }

    #[tokio::test]
    async fn test_prune_removes_old_records() {
        let controller = AdmissionController::in_memory().unwrap();
        let now = Utc::now();

        controller
            .record_post("a", ContentClass::News, now - ChronoDuration::days(10))
            .await
            .unwrap();
        controller
            .record_post("a", ContentClass::News, now - ChronoDuration::hours(1))
            .await
            .unwrap();

        let removed = controller.prune_older_than(7).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(controller.count("a", ContentClass::News).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_orders_newest_first() {
        let controller = AdmissionController::in_memory().unwrap();
        let now = Utc::now();

        controller
            .record_post("a", ContentClass::News, now - ChronoDuration::hours(2))
            .await
            .unwrap();
        controller
            .record_post("b", ContentClass::Weather, now - ChronoDuration::hours(1))
            .await
            .unwrap();

        let all = controller.recent(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].channel, "b");

        let only_a = controller.recent(Some("a"), 10).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].content_class, ContentClass::News);
    }
}
