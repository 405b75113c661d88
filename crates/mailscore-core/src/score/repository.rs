//! Score repository for persistent storage of classification results.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use super::model::{Category, ScoreRecord, UnknownCategory};
use crate::Result;

/// Columns selected for a full record.
const RECORD_COLUMNS: &str = "id, email_id, sender, subject, importance_score, spam_score, \
     category, confidence, reasoning, needs_review, model, scored_at, labels_applied, \
     actions_taken";

/// Repository for score records and processing state.
///
/// Cloning is cheap and shares the underlying pool.
#[derive(Debug, Clone)]
pub struct ScoreRepository {
    pool: SqlitePool,
}

impl ScoreRepository {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        // Append-only: a reprocess pass adds a row, the highest id wins.
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS email_scores (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email_id TEXT NOT NULL,
                sender TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL DEFAULT '',
                importance_score REAL NOT NULL,
                spam_score REAL NOT NULL,
                category TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL DEFAULT '',
                needs_review INTEGER NOT NULL DEFAULT 0,
                model TEXT NOT NULL DEFAULT '',
                scored_at TEXT NOT NULL,
                labels_applied TEXT NOT NULL DEFAULT '',
                actions_taken TEXT NOT NULL DEFAULT ''
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Databases created before actions were recorded lack the column.
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM pragma_table_info('email_scores') \
             WHERE name = 'actions_taken'",
        )
        .fetch_one(&self.pool)
        .await?;
        if row.get::<i64, _>("count") == 0 {
            sqlx::query(
                "ALTER TABLE email_scores ADD COLUMN actions_taken TEXT NOT NULL DEFAULT ''",
            )
            .execute(&self.pool)
            .await?;
            tracing::info!("Added actions_taken column to email_scores");
        }

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_email_scores_email
            ON email_scores(email_id, id)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_email_scores_scored_at
            ON email_scores(scored_at)
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS processing_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a score record.
    ///
    /// Returns the new row id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert(&self, record: &ScoreRecord) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO email_scores
                (email_id, sender, subject, importance_score, spam_score, category,
                 confidence, reasoning, needs_review, model, scored_at, labels_applied,
                 actions_taken)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&record.email_id)
        .bind(&record.sender)
        .bind(&record.subject)
        .bind(record.importance_score)
        .bind(record.spam_score)
        .bind(record.category.as_str())
        .bind(record.confidence)
        .bind(&record.reasoning)
        .bind(record.needs_review)
        .bind(&record.model)
        .bind(timestamp(record.scored_at))
        .bind(record.labels_csv())
        .bind(record.actions_csv())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Latest record for an email, if it was ever scored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or the row is malformed.
    pub async fn latest(&self, email_id: &str) -> Result<Option<ScoreRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM email_scores WHERE email_id = ? ORDER BY id DESC LIMIT 1"
        ))
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    /// Check if an email has a score record.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_processed(&self, email_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) as count
            FROM email_scores
            WHERE email_id = ?
            ",
        )
        .bind(email_id)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        Ok(count > 0)
    }

    /// Every version of an email's record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is malformed.
    pub async fn history(&self, email_id: &str) -> Result<Vec<ScoreRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM email_scores WHERE email_id = ? ORDER BY id ASC"
        ))
        .bind(email_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Latest record of every email scored in `[since, until)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a row is malformed.
    pub async fn latest_in_window(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<ScoreRecord>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {RECORD_COLUMNS}
            FROM email_scores s
            WHERE s.id = (SELECT MAX(id) FROM email_scores WHERE email_id = s.email_id)
              AND s.scored_at >= ? AND s.scored_at < ?
            ORDER BY s.scored_at ASC, s.id ASC
            "
        ))
        .bind(timestamp(since))
        .bind(timestamp(until))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Aggregate statistics over the latest records scored since `since`.
    ///
    /// `high_importance` and `spam` are the thresholds used for the
    /// corresponding counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn stats(
        &self,
        since: DateTime<Utc>,
        high_importance: f64,
        spam: f64,
    ) -> Result<ScoringStats> {
        let rows = sqlx::query(
            r"
            SELECT
                category,
                COUNT(*) as count,
                AVG(confidence) as avg_confidence,
                SUM(CASE WHEN importance_score >= ? THEN 1 ELSE 0 END) as high_importance,
                SUM(CASE WHEN spam_score >= ? THEN 1 ELSE 0 END) as likely_spam,
                SUM(CASE WHEN needs_review = 1 THEN 1 ELSE 0 END) as fallbacks
            FROM email_scores s
            WHERE s.id = (SELECT MAX(id) FROM email_scores WHERE email_id = s.email_id)
              AND s.scored_at >= ?
            GROUP BY category
            ORDER BY count DESC, category ASC
            ",
        )
        .bind(high_importance)
        .bind(spam)
        .bind(timestamp(since))
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ScoringStats {
            since,
            ..ScoringStats::default()
        };
        let mut confidence_sum = 0.0;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        for row in &rows {
            let count = row.get::<i64, _>("count") as u32;
            let category: String = row.get("category");
            let Some(category) = Category::parse(&category) else {
                tracing::warn!(category = %category, "Skipping unknown category in stats");
                continue;
            };

            stats.total_processed += count;
            stats.high_importance_count += row.get::<i64, _>("high_importance") as u32;
            stats.likely_spam_count += row.get::<i64, _>("likely_spam") as u32;
            stats.fallback_count += row.get::<i64, _>("fallbacks") as u32;
            confidence_sum += row.get::<f64, _>("avg_confidence") * f64::from(count);
            stats.categories.push((category, count));
        }

        if stats.total_processed > 0 {
            stats.avg_confidence = confidence_sum / f64::from(stats.total_processed);
        }

        Ok(stats)
    }

    /// Read a processing-state value.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM processing_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("value")))
    }

    /// Write a processing-state value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn put_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO processing_state (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write a processing-state value only if the key is absent.
    ///
    /// Returns true if the value was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_state(&self, key: &str, value: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO processing_state (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO NOTHING
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace a processing-state value only if it still equals `expected`.
    ///
    /// Returns true if the value was replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn replace_state(&self, key: &str, expected: &str, value: &str) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE processing_state
            SET value = ?, updated_at = CURRENT_TIMESTAMP
            WHERE key = ? AND value = ?
            ",
        )
        .bind(value)
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete a processing-state value only if it still equals `expected`.
    ///
    /// Returns true if a row was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete_state(&self, key: &str, expected: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM processing_state WHERE key = ? AND value = ?")
            .bind(key)
            .bind(expected)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Statistics about scored email.
#[derive(Debug, Clone, Default)]
pub struct ScoringStats {
    /// Start of the reporting period.
    pub since: DateTime<Utc>,
    /// Emails scored in the period.
    pub total_processed: u32,
    /// Average model confidence.
    pub avg_confidence: f64,
    /// Emails at or above the high-importance threshold.
    pub high_importance_count: u32,
    /// Emails at or above the spam threshold.
    pub likely_spam_count: u32,
    /// Fallback records (classification failed).
    pub fallback_count: u32,
    /// Email count per category, largest first.
    pub categories: Vec<(Category, u32)>,
}

impl fmt::Display for ScoringStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Email Scoring Report")?;
        writeln!(f, "====================")?;
        writeln!(f, "Since: {}", self.since.format("%Y-%m-%d %H:%M UTC"))?;
        writeln!(f)?;
        writeln!(f, "Total Emails Processed: {}", self.total_processed)?;
        writeln!(f, "Average Confidence: {:.2}", self.avg_confidence)?;
        writeln!(f, "High Importance Emails: {}", self.high_importance_count)?;
        writeln!(f, "Likely Spam: {}", self.likely_spam_count)?;
        writeln!(f, "Failed Classifications: {}", self.fallback_count)?;
        writeln!(f)?;
        writeln!(f, "Category Breakdown:")?;
        writeln!(f, "{}", "-".repeat(20))?;
        for (category, count) in &self.categories {
            let percentage = if self.total_processed > 0 {
                f64::from(*count) / f64::from(self.total_processed) * 100.0
            } else {
                0.0
            };
            writeln!(f, "{:16} {count:4} ({percentage:5.1}%)", category.as_str())?;
        }
        Ok(())
    }
}

/// Format a timestamp so stored values sort lexicographically.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub(crate) fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Convert a database row to a `ScoreRecord`.
fn row_to_record(row: &SqliteRow) -> Result<ScoreRecord> {
    let category: String = row.get("category");
    let category = Category::parse(&category)
        .ok_or_else(|| sqlx::Error::Decode(Box::new(UnknownCategory(category))))?;
    let scored_at: String = row.get("scored_at");
    let labels: String = row.get("labels_applied");
    let actions: String = row.get("actions_taken");

    Ok(ScoreRecord {
        id: Some(row.get("id")),
        email_id: row.get("email_id"),
        sender: row.get("sender"),
        subject: row.get("subject"),
        importance_score: row.get("importance_score"),
        spam_score: row.get("spam_score"),
        category,
        confidence: row.get("confidence"),
        reasoning: row.get("reasoning"),
        needs_review: row.get("needs_review"),
        model: row.get("model"),
        scored_at: parse_timestamp(&scored_at)?,
        labels_applied: ScoreRecord::parse_labels(&labels),
        actions_taken: ScoreRecord::parse_actions(&actions),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::Action;
    use chrono::Duration;

    fn record(email_id: &str, category: Category, importance: f64) -> ScoreRecord {
        ScoreRecord::new(email_id, importance, 1.0, category, 0.8)
    }

    #[tokio::test]
    async fn test_insert_and_latest() {
        let repo = ScoreRepository::in_memory().await.unwrap();

        let mut first = record("msg-1", Category::Work, 8.5);
        first.sender = "boss@corp.example".to_string();
        first.labels_applied.insert("EmailScorer/High-Importance".to_string());
        first.actions_taken.insert(Action::Star);
        let id = repo.insert(&first).await.unwrap();

        let stored = repo.latest("msg-1").await.unwrap().unwrap();
        assert_eq!(stored.id, Some(id));
        assert_eq!(stored.category, Category::Work);
        assert_eq!(stored.sender, "boss@corp.example");
        assert_eq!(stored.labels_applied, first.labels_applied);
        assert_eq!(stored.actions_taken, first.actions_taken);
        assert!(!stored.needs_review);

        assert!(repo.latest("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_initialize_adds_actions_column() {
        let repo = ScoreRepository::in_memory().await.unwrap();
        sqlx::query("ALTER TABLE email_scores DROP COLUMN actions_taken")
            .execute(&repo.pool)
            .await
            .unwrap();

        repo.initialize().await.unwrap();

        let mut starred = record("msg-1", Category::Work, 9.5);
        starred.actions_taken.insert(Action::Star);
        repo.insert(&starred).await.unwrap();
        let stored = repo.latest("msg-1").await.unwrap().unwrap();
        assert_eq!(stored.actions_taken, starred.actions_taken);

        // Idempotent once the column exists.
        repo.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_reprocess_appends_and_latest_wins() {
        let repo = ScoreRepository::in_memory().await.unwrap();

        repo.insert(&record("msg-1", Category::Work, 3.0)).await.unwrap();
        repo.insert(&record("msg-1", Category::Personal, 7.0))
            .await
            .unwrap();

        let latest = repo.latest("msg-1").await.unwrap().unwrap();
        assert_eq!(latest.category, Category::Personal);

        let history = repo.history("msg-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].category, Category::Work);
    }

    #[tokio::test]
    async fn test_is_processed() {
        let repo = ScoreRepository::in_memory().await.unwrap();
        assert!(!repo.is_processed("msg-1").await.unwrap());

        repo.insert(&record("msg-1", Category::Work, 3.0)).await.unwrap();
        assert!(repo.is_processed("msg-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_latest_in_window() {
        let repo = ScoreRepository::in_memory().await.unwrap();
        let now = Utc::now();

        let mut old = record("old", Category::Work, 5.0);
        old.scored_at = now - Duration::days(10);
        repo.insert(&old).await.unwrap();

        let mut recent = record("recent", Category::Work, 5.0);
        recent.scored_at = now - Duration::hours(1);
        repo.insert(&recent).await.unwrap();

        let mut rescored = recent.clone();
        rescored.category = Category::Finance;
        rescored.scored_at = now - Duration::minutes(5);
        repo.insert(&rescored).await.unwrap();

        let records = repo
            .latest_in_window(now - Duration::days(7), now)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].email_id, "recent");
        assert_eq!(records[0].category, Category::Finance);
    }

    #[tokio::test]
    async fn test_stats() {
        let repo = ScoreRepository::in_memory().await.unwrap();

        repo.insert(&record("a", Category::Work, 9.0)).await.unwrap();
        repo.insert(&record("b", Category::Work, 4.0)).await.unwrap();
        let mut spam = ScoreRecord::new("c", 1.0, 9.0, Category::Spam, 0.5);
        spam.needs_review = true;
        repo.insert(&spam).await.unwrap();

        let stats = repo
            .stats(Utc::now() - Duration::days(7), 8.0, 7.0)
            .await
            .unwrap();

        assert_eq!(stats.total_processed, 3);
        assert_eq!(stats.high_importance_count, 1);
        assert_eq!(stats.likely_spam_count, 1);
        assert_eq!(stats.fallback_count, 1);
        assert!((stats.avg_confidence - 0.7).abs() < 1e-9);
        assert_eq!(stats.categories[0], (Category::Work, 2));

        let rendered = stats.to_string();
        assert!(rendered.contains("Total Emails Processed: 3"));
        assert!(rendered.contains("work"));
    }

    #[tokio::test]
    async fn test_state_compare_and_swap() {
        let repo = ScoreRepository::in_memory().await.unwrap();

        assert!(repo.state("k").await.unwrap().is_none());
        assert!(repo.insert_state("k", "a").await.unwrap());
        assert!(!repo.insert_state("k", "b").await.unwrap());
        assert_eq!(repo.state("k").await.unwrap().as_deref(), Some("a"));

        assert!(!repo.replace_state("k", "b", "c").await.unwrap());
        assert!(repo.replace_state("k", "a", "c").await.unwrap());

        assert!(!repo.delete_state("k", "a").await.unwrap());
        assert!(repo.delete_state("k", "c").await.unwrap());

        repo.put_state("k", "x").await.unwrap();
        repo.put_state("k", "y").await.unwrap();
        assert_eq!(repo.state("k").await.unwrap().as_deref(), Some("y"));
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = Utc::now();
        let b = a + Duration::milliseconds(1);
        assert!(timestamp(a) < timestamp(b));
        assert_eq!(
            parse_timestamp(&timestamp(a)).unwrap().timestamp_micros(),
            a.timestamp_micros()
        );
    }
}
