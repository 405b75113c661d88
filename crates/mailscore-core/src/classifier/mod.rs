//! Email classification through a local language model.
//!
//! [`Classifier::classify`] makes a single attempt and reports why it
//! failed. [`Classifier::score`] is what the pipeline uses: it retries a
//! bounded number of times and then returns the fallback record, so a bad
//! reply never stops a batch.

mod inference;
mod parser;
mod prompt;

use std::time::Duration;

use chrono::Utc;

pub use inference::{InferenceClient, InferenceError, OpenAiClient};
pub use parser::{ParseError, ParsedScore, parse_reply};
pub use prompt::{Prompt, SYSTEM_PROMPT, build_prompt, normalize_body, truncate_chars};

use crate::config::InferenceConfig;
use crate::mail::Email;
use crate::score::ScoreRecord;

/// Why a single classification attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    /// The endpoint failed.
    #[error(transparent)]
    Inference(#[from] InferenceError),

    /// The attempt exceeded its time budget.
    #[error("classification timed out after {0:?}")]
    Timeout(Duration),

    /// The model returned nothing.
    #[error("empty response from model")]
    EmptyResponse,

    /// The reply could not be parsed.
    #[error("unparsable reply: {0}")]
    Parse(#[from] ParseError),
}

/// Turns emails into score records using an inference client.
#[derive(Debug, Clone)]
pub struct Classifier<C> {
    client: C,
    max_body_chars: usize,
    max_retries: u32,
    timeout: Duration,
}

impl<C: InferenceClient + Sync> Classifier<C> {
    /// Create a classifier.
    #[must_use]
    pub fn new(client: C, config: &InferenceConfig) -> Self {
        Self {
            client,
            max_body_chars: config.max_body_chars,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// The underlying inference client.
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Classify an email with a single inference call.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint fails, the call times out, or the
    /// reply is empty or unparsable.
    pub async fn classify(&self, email: &Email) -> Result<ScoreRecord, ClassificationError> {
        let prompt = build_prompt(email, self.max_body_chars);

        let reply = tokio::time::timeout(self.timeout, self.client.complete(&prompt))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))??;

        let reply = reply.trim();
        if reply.is_empty() {
            return Err(ClassificationError::EmptyResponse);
        }
        tracing::debug!(email_id = %email.id, chars = reply.len(), "Model reply received");

        let parsed = parse_reply(reply)?;
        let mut record = ScoreRecord::new(
            email.id.clone(),
            parsed.importance_score,
            parsed.spam_score,
            parsed.category,
            parsed.confidence,
        )
        .for_email(email);
        record.reasoning = parsed.reasoning;
        record.model = self.client.model().to_string();
        record.scored_at = Utc::now();
        Ok(record)
    }

    /// Classify an email, retrying failed attempts.
    ///
    /// After `1 + max_retries` failed attempts, returns the fallback record
    /// flagged for review.
    pub async fn score(&self, email: &Email) -> ScoreRecord {
        let attempts = self.max_retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.classify(email).await {
                Ok(record) => return record,
                Err(e) => {
                    tracing::warn!(
                        email_id = %email.id,
                        attempt,
                        attempts,
                        error = %e,
                        "Classification attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        let reason = last_error.map_or_else(|| "no attempts made".to_string(), |e| e.to_string());
        tracing::error!(
            email_id = %email.id,
            reason = %reason,
            "Classification failed, storing fallback"
        );
        ScoreRecord::fallback(email, self.client.model(), &reason)
    }
}
