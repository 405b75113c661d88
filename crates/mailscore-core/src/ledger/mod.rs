//! Processing ledger - which emails were scored and how far the window got.
//!
//! The window high-water mark lives in the `processing_state` table under
//! `last_processed` and only moves forward, except through an explicit
//! [`Ledger::reset_window`]. The same table holds the advisory
//! `batch_lock` row that keeps two batches from running at once.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::score::{ScoreRecord, ScoreRepository, parse_timestamp, timestamp};
use crate::{Error, Result};

/// Key of the window high-water mark.
pub const LAST_PROCESSED_KEY: &str = "last_processed";

/// Key of the batch lock row.
pub const BATCH_LOCK_KEY: &str = "batch_lock";

/// Whether an email should be scored in this pass.
///
/// Previously scored emails are skipped unless `reprocess` is set.
#[must_use]
pub const fn should_process(processed_before: bool, reprocess: bool) -> bool {
    !processed_before || reprocess
}

/// Durable record of processing progress.
#[derive(Debug, Clone)]
pub struct Ledger {
    repo: ScoreRepository,
    lock_ttl: Duration,
}

impl Ledger {
    /// Create a ledger over a score repository.
    ///
    /// Batch locks older than `lock_ttl_secs` are considered abandoned. A
    /// negative TTL counts as zero and one too large to represent never
    /// expires.
    #[must_use]
    pub fn new(repo: ScoreRepository, lock_ttl_secs: i64) -> Self {
        Self {
            repo,
            lock_ttl: Duration::try_seconds(lock_ttl_secs.max(0)).unwrap_or(Duration::MAX),
        }
    }

    /// The underlying repository.
    #[must_use]
    pub const fn repository(&self) -> &ScoreRepository {
        &self.repo
    }

    /// Check whether an email has a score record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_processed(&self, email_id: &str) -> Result<bool> {
        self.repo.is_processed(email_id).await
    }

    /// Durably store a score record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn record_processed(&self, record: &ScoreRecord) -> Result<i64> {
        self.repo.insert(record).await
    }

    /// The stored window high-water mark, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the value is corrupt.
    pub async fn last_processed(&self) -> Result<Option<DateTime<Utc>>> {
        match self.repo.state(LAST_PROCESSED_KEY).await? {
            Some(raw) => Ok(Some(parse_timestamp(&raw)?)),
            None => Ok(None),
        }
    }

    /// Where the next batch starts: the stored mark, else `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn window_start(&self, default: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Ok(self.last_processed().await?.unwrap_or(default))
    }

    /// Move the window forward to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LedgerConflict`] if `to` is earlier than the stored
    /// mark; the mark is left unchanged.
    pub async fn advance_window(&self, to: DateTime<Utc>) -> Result<()> {
        if let Some(current) = self.last_processed().await?
            && to < current
        {
            return Err(Error::LedgerConflict {
                current,
                requested: to,
            });
        }

        self.repo.put_state(LAST_PROCESSED_KEY, &timestamp(to)).await?;
        tracing::debug!(window = %to, "Processing window advanced");
        Ok(())
    }

    /// Set the window to `to`, earlier or later.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn reset_window(&self, to: DateTime<Utc>) -> Result<()> {
        self.repo.put_state(LAST_PROCESSED_KEY, &timestamp(to)).await?;
        tracing::info!(window = %to, "Processing window reset");
        Ok(())
    }

    /// Take the batch lock.
    ///
    /// A lock older than the configured TTL is taken over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchInProgress`] if another live batch holds it.
    pub async fn acquire_batch_lock(&self, owner: &str) -> Result<BatchLock> {
        let now = Utc::now();
        let info = LockInfo {
            owner: owner.to_string(),
            token: format!(
                "{}-{}",
                std::process::id(),
                now.timestamp_nanos_opt().unwrap_or_default()
            ),
            acquired_at: now,
        };
        let value = serde_json::to_string(&info)?;

        if self.repo.insert_state(BATCH_LOCK_KEY, &value).await? {
            tracing::debug!(owner, "Batch lock acquired");
            return Ok(BatchLock::new(self.repo.clone(), value, info));
        }

        let Some(existing) = self.repo.state(BATCH_LOCK_KEY).await? else {
            // Released between our insert and read; try once more.
            if self.repo.insert_state(BATCH_LOCK_KEY, &value).await? {
                return Ok(BatchLock::new(self.repo.clone(), value, info));
            }
            return Err(Error::BatchInProgress {
                owner: "unknown".to_string(),
                since: now,
            });
        };

        let holder = serde_json::from_str::<LockInfo>(&existing).ok();
        let stale = holder.as_ref().is_none_or(|h| {
            h.acquired_at
                .checked_add_signed(self.lock_ttl)
                .is_some_and(|expiry| expiry <= now)
        });

        if stale && self.repo.replace_state(BATCH_LOCK_KEY, &existing, &value).await? {
            tracing::warn!(
                owner,
                previous = holder.as_ref().map_or("unknown", |h| h.owner.as_str()),
                "Took over stale batch lock"
            );
            return Ok(BatchLock::new(self.repo.clone(), value, info));
        }

        Err(holder.map_or_else(
            || Error::BatchInProgress {
                owner: "unknown".to_string(),
                since: now,
            },
            |h| Error::BatchInProgress {
                owner: h.owner,
                since: h.acquired_at,
            },
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    owner: String,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// A held batch lock. Release it on every exit path.
#[derive(Debug)]
pub struct BatchLock {
    repo: ScoreRepository,
    value: String,
    info: LockInfo,
}

impl BatchLock {
    const fn new(repo: ScoreRepository, value: String, info: LockInfo) -> Self {
        Self { repo, value, info }
    }

    /// Lock holder.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.info.owner
    }

    /// When the lock was taken.
    #[must_use]
    pub const fn acquired_at(&self) -> DateTime<Utc> {
        self.info.acquired_at
    }

    /// Release the lock.
    ///
    /// A lock that was taken over in the meantime is left to its new owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn release(self) -> Result<()> {
        if self.repo.delete_state(BATCH_LOCK_KEY, &self.value).await? {
            tracing::debug!(owner = %self.info.owner, "Batch lock released");
        } else {
            tracing::warn!(owner = %self.info.owner, "Batch lock was taken over before release");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn ledger(ttl: i64) -> Ledger {
        Ledger::new(ScoreRepository::in_memory().await.unwrap(), ttl)
    }

    #[test]
    fn test_should_process() {
        assert!(should_process(false, false));
        assert!(!should_process(true, false));
        assert!(should_process(true, true));
        assert!(should_process(false, true));
    }

    #[tokio::test]
    async fn test_window_defaults_until_advanced() {
        let ledger = ledger(3600).await;
        let default = Utc::now() - Duration::hours(1);

        assert_eq!(ledger.window_start(default).await.unwrap(), default);

        let mark = Utc::now();
        ledger.advance_window(mark).await.unwrap();
        let stored = ledger.window_start(default).await.unwrap();
        assert_eq!(stored.timestamp_micros(), mark.timestamp_micros());
    }

    #[tokio::test]
    async fn test_advance_rejects_going_backwards() {
        let ledger = ledger(3600).await;
        let mark = Utc::now();
        ledger.advance_window(mark).await.unwrap();

        let err = ledger
            .advance_window(mark - Duration::minutes(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerConflict { .. }));

        let stored = ledger.last_processed().await.unwrap().unwrap();
        assert_eq!(stored.timestamp_micros(), mark.timestamp_micros());

        // Same value is not a conflict.
        ledger.advance_window(stored).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_moves_backwards() {
        let ledger = ledger(3600).await;
        let mark = Utc::now();
        ledger.advance_window(mark).await.unwrap();

        let earlier = mark - Duration::days(2);
        ledger.reset_window(earlier).await.unwrap();
        let stored = ledger.last_processed().await.unwrap().unwrap();
        assert_eq!(stored.timestamp_micros(), earlier.timestamp_micros());
    }

    #[tokio::test]
    async fn test_record_processed() {
        let ledger = ledger(3600).await;
        assert!(!ledger.is_processed("msg-1").await.unwrap());

        let record = ScoreRecord::new("msg-1", 5.0, 0.0, crate::score::Category::Work, 0.9);
        ledger.record_processed(&record).await.unwrap();
        assert!(ledger.is_processed("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_lock_is_exclusive() {
        let ledger = ledger(3600).await;

        let lock = ledger.acquire_batch_lock("first").await.unwrap();
        assert_eq!(lock.owner(), "first");

        let err = ledger.acquire_batch_lock("second").await.unwrap_err();
        match err {
            Error::BatchInProgress { owner, .. } => assert_eq!(owner, "first"),
            other => panic!("unexpected error: {other}"),
        }

        lock.release().await.unwrap();
        let again = ledger.acquire_batch_lock("second").await.unwrap();
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let ledger = ledger(0).await;

        let abandoned = ledger.acquire_batch_lock("crashed").await.unwrap();
        let lock = ledger.acquire_batch_lock("fresh").await.unwrap();
        assert_eq!(lock.owner(), "fresh");

        // The old holder's release must not free the new holder's lock.
        abandoned.release().await.unwrap();
        let held = ledger.repository().state(BATCH_LOCK_KEY).await.unwrap().unwrap();
        assert!(held.contains("fresh"));

        lock.release().await.unwrap();
        assert!(ledger.repository().state(BATCH_LOCK_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extreme_ttl_does_not_panic() {
        let forever = ledger(i64::MAX).await;
        let lock = forever.acquire_batch_lock("first").await.unwrap();
        assert!(forever.acquire_batch_lock("second").await.is_err());
        lock.release().await.unwrap();

        let negative = ledger(-5).await;
        let _abandoned = negative.acquire_batch_lock("crashed").await.unwrap();
        let lock = negative.acquire_batch_lock("fresh").await.unwrap();
        assert_eq!(lock.owner(), "fresh");
    }
}
