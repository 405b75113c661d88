//! Batch driver: pull, score, label, act, record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::classifier::{Classifier, InferenceClient};
use crate::config::{Config, ProcessingConfig, matches_sender};
use crate::ledger::{Ledger, should_process};
use crate::mail::{Email, MailStore};
use crate::policy::{Action, Label, LabelPolicy};
use crate::score::{ScoreRecord, ScoreRepository};
use crate::{Error, Result};

/// Parameters of one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchParams {
    /// Start of the window; the ledger's mark when absent.
    pub window_start: Option<DateTime<Utc>>,
    /// End of the window. Emails received later are left for the next batch.
    pub window_end: DateTime<Utc>,
    /// Score emails again even if they already have a record.
    pub reprocess: bool,
}

impl BatchParams {
    /// A batch from the ledger's mark up to now.
    #[must_use]
    pub fn now() -> Self {
        Self {
            window_start: None,
            window_end: Utc::now(),
            reprocess: false,
        }
    }

    /// Start the window at `start` instead of the ledger's mark.
    #[must_use]
    pub const fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.window_start = Some(start);
        self
    }

    /// Set whether processed emails are scored again.
    #[must_use]
    pub const fn reprocess(mut self, reprocess: bool) -> Self {
        self.reprocess = reprocess;
        self
    }
}

/// Counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Emails listed in the window.
    pub pulled: usize,
    /// Emails scored and recorded.
    pub processed: usize,
    /// Emails skipped (already processed or skip-listed sender).
    pub skipped: usize,
    /// Emails whose record was rejected.
    pub failed: usize,
    /// Records stored as fallbacks after classification failed.
    pub fallbacks: usize,
    /// Labels successfully applied.
    pub labels_applied: usize,
    /// Actions successfully executed.
    pub actions_taken: usize,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pulled {}, processed {}, skipped {}, failed {}, fallbacks {}, labels {}, actions {}",
            self.pulled,
            self.processed,
            self.skipped,
            self.failed,
            self.fallbacks,
            self.labels_applied,
            self.actions_taken
        )
    }
}

/// Scores email from a mail store and keeps the ledger current.
#[derive(Debug)]
pub struct ScoringPipeline<M, C> {
    store: M,
    classifier: Classifier<C>,
    policy: LabelPolicy,
    ledger: Ledger,
    prefix: String,
    processing: ProcessingConfig,
    owner: String,
}

impl<M, C> ScoringPipeline<M, C>
where
    M: MailStore + Sync,
    C: InferenceClient + Sync,
{
    /// Assemble a pipeline.
    #[must_use]
    pub fn new(config: &Config, store: M, client: C, repo: ScoreRepository) -> Self {
        Self {
            store,
            classifier: Classifier::new(client, &config.inference),
            policy: LabelPolicy::new(config),
            ledger: Ledger::new(repo, config.processing.lock_ttl_secs),
            prefix: config.labels.prefix.clone(),
            processing: config.processing.clone(),
            owner: format!("mailscore-{}", std::process::id()),
        }
    }

    /// The mail store.
    pub const fn store(&self) -> &M {
        &self.store
    }

    /// The processing ledger.
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The classifier.
    pub const fn classifier(&self) -> &Classifier<C> {
        &self.classifier
    }

    /// Create every scorer label, with its colour, on the mail store.
    ///
    /// # Errors
    ///
    /// Returns an error if the mail store rejects a label.
    pub async fn ensure_labels(&self) -> Result<()> {
        for label in Label::ALL {
            self.store
                .ensure_label(&label.qualified(&self.prefix), Some(label.color()))
                .await?;
        }
        tracing::debug!(count = Label::ALL.len(), prefix = %self.prefix, "Labels ensured");
        Ok(())
    }

    /// Run one batch.
    ///
    /// The window advances only when every listed email was handled. A
    /// cancelled or failed batch leaves it where it was, so the next run
    /// retries whatever was not recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if another batch is running, listing fails, the
    /// database fails, or the batch is cancelled.
    pub async fn run_batch(
        &self,
        params: BatchParams,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let lock = self.ledger.acquire_batch_lock(&self.owner).await?;
        let result = self.run_locked(params, cancel).await;

        if let Err(e) = lock.release().await {
            tracing::error!(error = %e, "Failed to release batch lock");
        }
        result
    }

    async fn run_locked(
        &self,
        params: BatchParams,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let start = match params.window_start {
            Some(start) => start,
            None => {
                let hours_back = self.processing.default_hours_back;
                let default = chrono::Duration::try_hours(hours_back)
                    .and_then(|back| params.window_end.checked_sub_signed(back))
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "processing.default_hours_back {hours_back} out of range"
                        ))
                    })?;
                self.ledger.window_start(default).await?
            }
        };
        let reprocess = params.reprocess || !self.processing.skip_processed;

        tracing::info!(
            since = %start,
            until = %params.window_end,
            reprocess,
            "Starting batch"
        );

        let (listed, truncated) = self.list_page(start).await?;
        let emails: Vec<Email> = listed
            .into_iter()
            .filter(|e| e.received_at <= params.window_end)
            .collect();

        let mut summary = BatchSummary {
            pulled: emails.len(),
            ..BatchSummary::default()
        };

        for (index, email) in emails.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(processed = summary.processed, "Batch cancelled");
                return Err(Error::Cancelled {
                    processed: summary.processed,
                });
            }

            self.process_email(email, reprocess, &mut summary).await?;

            if self.processing.delay_ms > 0 && index + 1 < emails.len() {
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_millis(self.processing.delay_ms)) => {}
                }
            }
        }

        // A full page may have left emails behind; resume from the last one
        // listed and let the ledger skip what is already recorded.
        let mark = match emails.last() {
            Some(last) if truncated => last.received_at,
            _ => params.window_end,
        };
        // An explicit start may replay a window the ledger is already past.
        match self.ledger.last_processed().await? {
            Some(current) if mark < current => {
                tracing::debug!(window = %current, "Window already beyond this batch");
            }
            _ => self.ledger.advance_window(mark).await?,
        }

        tracing::info!(
            pulled = summary.pulled,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            fallbacks = summary.fallbacks,
            "Batch complete"
        );
        Ok(summary)
    }

    /// List emails received at or after `start`, one batch worth.
    ///
    /// A full page that ends at `start` would leave the mark where it is, so
    /// the listing is widened until it reaches past `start` or comes back
    /// short. Emails already recorded at that instant are skipped later.
    async fn list_page(&self, start: DateTime<Utc>) -> Result<(Vec<Email>, bool)> {
        let mut limit = self.processing.max_emails_per_batch;
        loop {
            let listed = self.store.list_emails(start, limit).await?;
            let truncated = listed.len() >= limit;
            let stuck = truncated && listed.last().is_some_and(|e| e.received_at <= start);
            if !stuck || limit == usize::MAX {
                return Ok((listed, truncated));
            }

            tracing::debug!(since = %start, limit, "Page ends at the mark, widening");
            limit = limit.saturating_mul(2);
        }
    }

    /// Handle one email. Only storage failures are returned.
    async fn process_email(
        &self,
        email: &Email,
        reprocess: bool,
        summary: &mut BatchSummary,
    ) -> Result<()> {
        let address = email.sender_address();
        if matches_sender(&self.processing.skip_senders, &address) {
            tracing::debug!(email_id = %email.id, sender = %address, "Skipping listed sender");
            summary.skipped += 1;
            return Ok(());
        }

        let processed_before = self.ledger.is_processed(&email.id).await?;
        if !should_process(processed_before, reprocess) {
            tracing::debug!(email_id = %email.id, "Already processed");
            summary.skipped += 1;
            return Ok(());
        }
        let previous = if processed_before {
            self.ledger.repository().latest(&email.id).await?
        } else {
            None
        };

        let mut record = self.classifier.score(email).await;
        if record.needs_review {
            summary.fallbacks += 1;
        }

        let decision = match self.policy.decide(&record) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(email_id = %email.id, error = %e, "Score record rejected");
                summary.failed += 1;
                return Ok(());
            }
        };

        let wanted = decision.qualified_labels(&self.prefix);
        for name in &wanted {
            match self.store.apply_label(&email.id, name).await {
                Ok(()) => {
                    record.labels_applied.insert(name.clone());
                    summary.labels_applied += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        email_id = %email.id,
                        label = %name,
                        error = %e,
                        "Failed to apply label"
                    );
                }
            }
        }

        if let Some(previous) = previous {
            self.remove_stale_labels(&email.id, &previous, &wanted).await;
            // Earlier stars and moves still shape the mailbox.
            record.actions_taken.extend(previous.actions_taken);
        }

        for action in &decision.actions {
            let result = match action {
                Action::MoveToSpam => self.store.move_to_spam(&email.id).await,
                Action::Archive => self.store.archive(&email.id).await,
                Action::Star => self.store.star(&email.id).await,
            };
            match result {
                Ok(()) => {
                    tracing::info!(email_id = %email.id, action = %action, "Action taken");
                    record.actions_taken.insert(*action);
                    summary.actions_taken += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        email_id = %email.id,
                        action = %action,
                        error = %e,
                        "Action failed"
                    );
                }
            }
        }

        self.ledger.record_processed(&record).await?;
        summary.processed += 1;

        tracing::info!(
            email_id = %email.id,
            category = %record.category,
            importance = record.importance_score,
            spam = record.spam_score,
            confidence = record.confidence,
            labels = %record.labels_csv(),
            "Email scored"
        );
        Ok(())
    }

    /// Remove labels a previous pass applied that the new decision drops.
    ///
    /// Training labels belong to the user and are never touched.
    async fn remove_stale_labels(&self, email_id: &str, previous: &ScoreRecord, wanted: &[String]) {
        for name in &previous.labels_applied {
            if wanted.contains(name) {
                continue;
            }
            match Label::from_qualified(&self.prefix, name) {
                Some(Label::TrainingCorrect | Label::TrainingIncorrect) | None => continue,
                Some(_) => {}
            }
            if let Err(e) = self.store.remove_label(email_id, name).await {
                tracing::warn!(email_id, label = %name, error = %e, "Failed to remove stale label");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_params_builders() {
        let params = BatchParams::now();
        assert!(params.window_start.is_none());
        assert!(!params.reprocess);

        let start = params.window_end - chrono::Duration::hours(2);
        let params = params.starting_at(start).reprocess(true);
        assert_eq!(params.window_start, Some(start));
        assert!(params.reprocess);
    }

    #[test]
    fn test_summary_display() {
        let summary = BatchSummary {
            pulled: 5,
            processed: 3,
            skipped: 2,
            ..BatchSummary::default()
        };
        assert_eq!(
            summary.to_string(),
            "pulled 5, processed 3, skipped 2, failed 0, fallbacks 0, labels 0, actions 0"
        );
    }
}
