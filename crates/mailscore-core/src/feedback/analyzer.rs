//! Infers feedback from mailbox state and aggregates accuracy.

use chrono::{DateTime, Utc};

use super::model::{
    AccuracyReport, BucketStats, EvidenceLevel, Feedback, Recommendation, SignalStrength,
};
use crate::Result;
use crate::config::{Config, Thresholds};
use crate::mail::{MailStore, MessageState};
use crate::policy::{Action, Label};
use crate::score::{Category, ImportanceBand, ScoreRecord, ScoreRepository};

/// Accuracy below which a bucket drives a recommendation.
const ACCURACY_FLOOR: f64 = 0.7;

/// Accuracy below which a category's prompt guidance is questioned.
const CATEGORY_ACCURACY_FLOOR: f64 = 0.6;

/// Threshold adjustment step.
const THRESHOLD_STEP: f64 = 0.5;

/// Infer what the user thought of a classification.
///
/// `state` is `None` when the message no longer exists. Rules are tried in
/// order and the first that applies wins. A star, archive or spam move the
/// record says the scorer made itself is not a signal.
#[must_use]
pub fn infer_outcome(
    record: &ScoreRecord,
    state: Option<&MessageState>,
    prefix: &str,
) -> Feedback {
    let deleted = state.is_none_or(MessageState::is_deleted);

    let applied: Vec<Label> = record
        .labels_applied
        .iter()
        .filter_map(|name| Label::from_qualified(prefix, name))
        .collect();

    if let Some(state) = state {
        let has = |label: Label| state.labels.contains(&label.qualified(prefix));

        if has(Label::TrainingCorrect) {
            return Feedback::confirmed(SignalStrength::Explicit);
        }
        if has(Label::TrainingIncorrect) {
            return Feedback::overridden(SignalStrength::Explicit);
        }
        if !deleted && applied.iter().any(|label| !has(*label)) {
            return Feedback::overridden(SignalStrength::Strong);
        }
    }

    let ours = |action: Action| record.actions_taken.contains(&action);
    let starred = state.is_some_and(|s| s.starred) && !ours(Action::Star);
    let archived = state.is_some_and(MessageState::is_archived) && !ours(Action::Archive);
    let in_spam = state.is_some_and(MessageState::is_spam) && !ours(Action::MoveToSpam);

    if applied.contains(&Label::HighImportance) {
        if starred {
            return Feedback::confirmed(SignalStrength::Strong);
        }
        if deleted {
            return Feedback::overridden(SignalStrength::Strong);
        }
    }

    if applied.contains(&Label::LowImportance) {
        if deleted || archived {
            return Feedback::confirmed(SignalStrength::Soft);
        }
        if starred {
            return Feedback::overridden(SignalStrength::Strong);
        }
    }

    if applied.contains(&Label::LikelySpam) {
        if deleted || in_spam {
            return Feedback::confirmed(SignalStrength::Strong);
        }
        if starred {
            return Feedback::overridden(SignalStrength::Strong);
        }
        // Left in the inbox for the whole window.
        if state.is_some_and(|s| s.folder == crate::mail::Folder::Inbox) {
            return Feedback::overridden(SignalStrength::Soft);
        }
    }

    Feedback::ignored()
}

/// Computes accuracy reports over a window of stored records.
///
/// Read-only: neither records nor the mailbox are modified.
#[derive(Debug)]
pub struct FeedbackAnalyzer<'a, M> {
    store: &'a M,
    repo: &'a ScoreRepository,
    thresholds: Thresholds,
    prefix: String,
    min_samples: u32,
}

impl<'a, M: MailStore + Sync> FeedbackAnalyzer<'a, M> {
    /// Create an analyzer.
    #[must_use]
    pub fn new(store: &'a M, repo: &'a ScoreRepository, config: &Config) -> Self {
        Self {
            store,
            repo,
            thresholds: config.thresholds,
            prefix: config.labels.prefix.clone(),
            min_samples: config.report.min_samples,
        }
    }

    /// Build an accuracy report for records scored in `[since, until)`.
    ///
    /// Records whose message state cannot be read are counted as
    /// unobservable and left out of every bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the score database cannot be read.
    pub async fn compute_accuracy(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<AccuracyReport> {
        let records = self.repo.latest_in_window(since, until).await?;

        let mut report = AccuracyReport {
            since,
            until,
            total: 0,
            overall: BucketStats::default(),
            by_category: std::collections::BTreeMap::new(),
            by_band: std::collections::BTreeMap::new(),
            by_label: std::collections::BTreeMap::new(),
            unobservable: 0,
            avg_confidence: 0.0,
            evidence: EvidenceLevel::Insufficient,
            recommendations: Vec::new(),
        };
        let mut confidence_sum = 0.0;

        for record in &records {
            report.total += 1;
            confidence_sum += record.confidence;

            let state = match self.store.message_state(&record.email_id).await {
                Ok(state) => state,
                Err(e) => {
                    tracing::debug!(
                        email_id = %record.email_id,
                        error = %e,
                        "Message state unavailable"
                    );
                    report.unobservable += 1;
                    continue;
                }
            };

            let feedback = infer_outcome(record, state.as_ref(), &self.prefix);
            let band = ImportanceBand::from_score(
                record.display_importance(),
                self.thresholds.high_importance,
                self.thresholds.medium_importance,
            );

            report.overall.add(feedback);
            report.by_category.entry(record.category).or_default().add(feedback);
            report.by_band.entry(band).or_default().add(feedback);
            for label in record
                .labels_applied
                .iter()
                .filter_map(|name| Label::from_qualified(&self.prefix, name))
            {
                report.by_label.entry(label).or_default().add(feedback);
            }
        }

        if report.total > 0 {
            report.avg_confidence = confidence_sum / f64::from(report.total);
        }
        report.evidence = EvidenceLevel::assess(
            report.overall.decided(),
            report.overall.explicit,
            self.min_samples,
        );
        report.recommendations = self.recommend(&report);

        tracing::info!(
            total = report.total,
            decided = report.overall.decided(),
            evidence = %report.evidence,
            "Accuracy report computed"
        );
        Ok(report)
    }

    fn recommend(&self, report: &AccuracyReport) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        if report.overall.decided() < self.min_samples {
            return recs;
        }

        // Accuracy of a bucket, only once it has enough decided outcomes.
        let sampled = |stats: Option<&BucketStats>| {
            stats
                .filter(|s| s.decided() >= self.min_samples)
                .and_then(BucketStats::accuracy)
        };

        if let Some(accuracy) = sampled(report.by_label.get(&Label::LikelySpam))
            && accuracy < ACCURACY_FLOOR
        {
            recs.push(Recommendation::RaiseSpamThreshold {
                current: self.thresholds.spam,
                suggested: (self.thresholds.spam + THRESHOLD_STEP).min(10.0),
                accuracy,
            });
        }

        if let Some(accuracy) = sampled(report.by_band.get(&ImportanceBand::High))
            && accuracy < ACCURACY_FLOOR
        {
            recs.push(Recommendation::RaiseHighThreshold {
                current: self.thresholds.high_importance,
                suggested: (self.thresholds.high_importance + THRESHOLD_STEP).min(10.0),
                accuracy,
            });
        }

        if let Some(accuracy) = sampled(report.by_band.get(&ImportanceBand::Low))
            && accuracy < ACCURACY_FLOOR
        {
            recs.push(Recommendation::LowerMediumThreshold {
                current: self.thresholds.medium_importance,
                suggested: (self.thresholds.medium_importance - THRESHOLD_STEP).max(0.0),
                accuracy,
            });
        }

        for category in Category::ALL {
            if let Some(accuracy) = sampled(report.by_category.get(&category))
                && accuracy < CATEGORY_ACCURACY_FLOOR
            {
                recs.push(Recommendation::ReviseCategoryGuidance { category, accuracy });
            }
        }

        if report.avg_confidence < self.thresholds.confidence {
            recs.push(Recommendation::LowConfidence {
                average: report.avg_confidence,
                threshold: self.thresholds.confidence,
            });
        }

        recs
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::mail::{Email, Folder, MailboxFile};

    const PREFIX: &str = "EmailScorer";

    fn record_with(labels: &[Label]) -> ScoreRecord {
        let mut record = ScoreRecord::new("msg-1", 5.0, 0.0, Category::Work, 0.9);
        record.labels_applied = labels.iter().map(|l| l.qualified(PREFIX)).collect();
        record
    }

    fn state_with(labels: &[Label], starred: bool, folder: Folder) -> MessageState {
        MessageState {
            labels: labels.iter().map(|l| l.qualified(PREFIX)).collect(),
            starred,
            folder,
        }
    }

    #[test]
    fn test_explicit_training_labels() {
        let record = record_with(&[Label::MediumImportance]);

        let state = state_with(
            &[Label::MediumImportance, Label::TrainingCorrect],
            false,
            Folder::Inbox,
        );
        assert_eq!(
            infer_outcome(&record, Some(&state), PREFIX),
            Feedback::confirmed(SignalStrength::Explicit)
        );

        // Explicit label wins even when our label was removed.
        let state = state_with(&[Label::TrainingIncorrect], false, Folder::Inbox);
        assert_eq!(
            infer_outcome(&record, Some(&state), PREFIX),
            Feedback::overridden(SignalStrength::Explicit)
        );
    }

    #[test]
    fn test_removed_label_is_override() {
        let record = record_with(&[Label::Travel, Label::NeedsReview]);
        let state = state_with(&[Label::Travel], false, Folder::Inbox);
        assert_eq!(
            infer_outcome(&record, Some(&state), PREFIX),
            Feedback::overridden(SignalStrength::Strong)
        );
    }

    #[test]
    fn test_high_importance_rules() {
        let record = record_with(&[Label::HighImportance]);

        let starred = state_with(&[Label::HighImportance], true, Folder::Inbox);
        assert_eq!(
            infer_outcome(&record, Some(&starred), PREFIX),
            Feedback::confirmed(SignalStrength::Strong)
        );

        assert_eq!(
            infer_outcome(&record, None, PREFIX),
            Feedback::overridden(SignalStrength::Strong)
        );

        let trashed = state_with(&[Label::HighImportance], false, Folder::Trash);
        assert_eq!(
            infer_outcome(&record, Some(&trashed), PREFIX),
            Feedback::overridden(SignalStrength::Strong)
        );

        let untouched = state_with(&[Label::HighImportance], false, Folder::Inbox);
        assert_eq!(infer_outcome(&record, Some(&untouched), PREFIX), Feedback::ignored());
    }

    #[test]
    fn test_low_importance_rules() {
        let record = record_with(&[Label::LowImportance]);

        let archived = state_with(&[Label::LowImportance], false, Folder::Archive);
        assert_eq!(
            infer_outcome(&record, Some(&archived), PREFIX),
            Feedback::confirmed(SignalStrength::Soft)
        );
        assert_eq!(
            infer_outcome(&record, None, PREFIX),
            Feedback::confirmed(SignalStrength::Soft)
        );

        let starred = state_with(&[Label::LowImportance], true, Folder::Inbox);
        assert_eq!(
            infer_outcome(&record, Some(&starred), PREFIX),
            Feedback::overridden(SignalStrength::Strong)
        );
    }

    #[test]
    fn test_likely_spam_rules() {
        let record = record_with(&[Label::LowImportance, Label::LikelySpam]);
        let labels = [Label::LowImportance, Label::LikelySpam];

        let in_spam = state_with(&labels, false, Folder::Spam);
        assert_eq!(
            infer_outcome(&record, Some(&in_spam), PREFIX),
            Feedback::confirmed(SignalStrength::Strong)
        );

        let in_inbox = state_with(&labels, false, Folder::Inbox);
        assert_eq!(
            infer_outcome(&record, Some(&in_inbox), PREFIX),
            Feedback::overridden(SignalStrength::Soft)
        );

        let medium_spam = record_with(&[Label::MediumImportance, Label::LikelySpam]);
        let starred = state_with(
            &[Label::MediumImportance, Label::LikelySpam],
            true,
            Folder::Inbox,
        );
        assert_eq!(
            infer_outcome(&medium_spam, Some(&starred), PREFIX),
            Feedback::overridden(SignalStrength::Strong)
        );
    }

    #[test]
    fn test_category_labels_without_signal_are_ignored() {
        let record = record_with(&[Label::OrdersShipping]);
        let state = state_with(&[Label::OrdersShipping], false, Folder::Archive);
        assert_eq!(infer_outcome(&record, Some(&state), PREFIX), Feedback::ignored());
    }

    async fn seed(
        store: &MailboxFile,
        repo: &ScoreRepository,
        id: &str,
        importance: f64,
        labels: &[Label],
        state: MessageState,
    ) {
        let now = Utc::now();
        store.insert(Email::new(id, "a@example.com", "s", "b", now));
        store.modify(id, |m| m.state = state);

        let mut record = ScoreRecord::new(id, importance, 0.0, Category::Work, 0.9);
        record.labels_applied = labels.iter().map(|l| l.qualified(PREFIX)).collect();
        record.scored_at = now - Duration::hours(1);
        repo.insert(&record).await.unwrap();
    }

    #[tokio::test]
    async fn test_compute_accuracy_buckets() {
        let store = MailboxFile::in_memory();
        let repo = ScoreRepository::in_memory().await.unwrap();
        let high = [Label::HighImportance];
        let low = [Label::LowImportance];

        seed(&store, &repo, "h1", 9.0, &high, state_with(&high, true, Folder::Inbox)).await;
        seed(&store, &repo, "h2", 9.0, &high, state_with(&high, false, Folder::Trash)).await;
        seed(&store, &repo, "l1", 2.0, &low, state_with(&low, false, Folder::Archive)).await;
        seed(&store, &repo, "l2", 2.0, &low, state_with(&low, false, Folder::Inbox)).await;

        let analyzer = FeedbackAnalyzer::new(&store, &repo, &Config::default());
        let now = Utc::now();
        let report = analyzer
            .compute_accuracy(now - Duration::days(7), now)
            .await
            .unwrap();

        assert_eq!(report.total, 4);
        assert_eq!(report.unobservable, 0);
        assert_eq!(report.overall.confirmed, 2);
        assert_eq!(report.overall.overridden, 1);
        assert_eq!(report.overall.ignored, 1);
        assert_eq!(report.by_band[&ImportanceBand::High].accuracy(), Some(0.5));
        assert_eq!(report.by_band[&ImportanceBand::Low].accuracy(), Some(1.0));
        assert_eq!(report.by_category[&Category::Work].total(), 4);
        assert_eq!(report.evidence, EvidenceLevel::Insufficient);
        assert!(report.recommendations.is_empty());

        // Records are untouched.
        assert_eq!(repo.history("h1").await.unwrap().len(), 1);
        assert!(report.to_string().contains("Evidence: insufficient"));
    }

    #[tokio::test]
    async fn test_recommendations_need_samples() {
        let store = MailboxFile::in_memory();
        let repo = ScoreRepository::in_memory().await.unwrap();
        let spam = [Label::MediumImportance, Label::LikelySpam];

        // Spam flags the user keeps starring.
        for i in 0..6 {
            let id = format!("s{i}");
            seed(&store, &repo, &id, 6.0, &spam, state_with(&spam, true, Folder::Inbox)).await;
        }

        let mut config = Config::default();
        config.report.min_samples = 5;
        let analyzer = FeedbackAnalyzer::new(&store, &repo, &config);
        let now = Utc::now();
        let report = analyzer
            .compute_accuracy(now - Duration::days(7), now)
            .await
            .unwrap();

        assert_eq!(report.evidence, EvidenceLevel::Moderate);
        assert!(report.recommendations.iter().any(|r| matches!(
            r,
            Recommendation::RaiseSpamThreshold { suggested, .. } if (*suggested - 7.5).abs() < 1e-9
        )));
        assert!(report.recommendations.iter().any(|r| matches!(
            r,
            Recommendation::ReviseCategoryGuidance { category: Category::Work, .. }
        )));

        config.report.min_samples = 50;
        let analyzer = FeedbackAnalyzer::new(&store, &repo, &config);
        let report = analyzer
            .compute_accuracy(now - Duration::days(7), now)
            .await
            .unwrap();
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_starred_low_mail_lowers_medium_threshold() {
        let store = MailboxFile::in_memory();
        let repo = ScoreRepository::in_memory().await.unwrap();
        let low = [Label::LowImportance];

        for i in 0..6 {
            let id = format!("l{i}");
            seed(&store, &repo, &id, 3.0, &low, state_with(&low, true, Folder::Inbox)).await;
        }

        let mut config = Config::default();
        config.report.min_samples = 5;
        let analyzer = FeedbackAnalyzer::new(&store, &repo, &config);
        let now = Utc::now();
        let report = analyzer
            .compute_accuracy(now - Duration::days(7), now)
            .await
            .unwrap();

        assert_eq!(report.by_band[&ImportanceBand::Low].overridden, 6);
        let rec = report
            .recommendations
            .iter()
            .find(|r| matches!(r, Recommendation::LowerMediumThreshold { .. }))
            .unwrap();
        let Recommendation::LowerMediumThreshold { current, suggested, .. } = rec else {
            unreachable!();
        };
        assert!((*current - config.thresholds.medium_importance).abs() < 1e-9);
        assert!((*suggested - (*current - 0.5)).abs() < 1e-9);
        assert!(!report
            .recommendations
            .iter()
            .any(|r| matches!(r, Recommendation::RaiseHighThreshold { .. })));
        assert!(rec.to_string().contains("medium_importance"));
    }
}
