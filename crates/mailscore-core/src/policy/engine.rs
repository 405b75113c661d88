//! The label policy engine.

use std::collections::BTreeSet;

use super::model::{Action, Decision, InvalidScoreError, Label};
use crate::config::{ActionRule, Config, Thresholds, matches_sender};
use crate::mail::sender_address;
use crate::score::{CONFIDENCE_RANGE, Category, SCORE_RANGE, ScoreRecord};

/// Maps score records to labels and gated actions.
///
/// No I/O; the same record always yields the same decision.
#[derive(Debug, Clone)]
pub struct LabelPolicy {
    thresholds: Thresholds,
    rules: Vec<ActionRule>,
    priority_senders: Vec<String>,
}

impl LabelPolicy {
    /// Build a policy from configuration.
    ///
    /// Action rules are kept only when actions are enabled globally and the
    /// rule itself is enabled.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let rules = if config.actions.enabled {
            config
                .actions
                .rules
                .iter()
                .filter(|rule| rule.enabled)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };

        Self {
            thresholds: config.thresholds,
            rules,
            priority_senders: config.processing.priority_senders.clone(),
        }
    }

    /// Decide labels and actions for a record.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidScoreError`] if a score or the confidence is outside
    /// its range. Malformed input is refused, never clamped.
    pub fn decide(&self, record: &ScoreRecord) -> Result<Decision, InvalidScoreError> {
        validate_record(record)?;

        let mut labels = BTreeSet::new();
        labels.insert(self.primary_label(record));

        if record.spam_score >= self.thresholds.spam {
            labels.insert(Label::LikelySpam);
        }
        if record.needs_review || record.confidence < self.thresholds.confidence {
            labels.insert(Label::NeedsReview);
        }

        let actions = self
            .rules
            .iter()
            .filter(|rule| rule_matches(rule, record))
            .map(|rule| rule.action)
            .collect();

        Ok(Decision {
            labels,
            actions,
            display_importance: record.display_importance(),
        })
    }

    /// Category label, or the importance tier when the category has none.
    fn primary_label(&self, record: &ScoreRecord) -> Label {
        match record.category {
            Category::Orders => Label::OrdersShipping,
            Category::Travel => Label::Travel,
            Category::Finance => Label::Finance,
            Category::Calendar => Label::CalendarEvents,
            Category::SoftwareLicense => Label::SoftwareLicense,
            _ => self.tier(record),
        }
    }

    fn tier(&self, record: &ScoreRecord) -> Label {
        if !self.priority_senders.is_empty()
            && matches_sender(&self.priority_senders, &sender_address(&record.sender))
        {
            return Label::HighImportance;
        }

        if record.importance_score >= self.thresholds.high_importance {
            Label::HighImportance
        } else if record.importance_score >= self.thresholds.medium_importance {
            Label::MediumImportance
        } else {
            Label::LowImportance
        }
    }

    /// Thresholds in effect.
    #[must_use]
    pub const fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Action rules in effect.
    #[must_use]
    pub fn active_rules(&self) -> &[ActionRule] {
        &self.rules
    }
}

/// Both factors must hold: every score condition and the confidence floor.
fn rule_matches(rule: &ActionRule, record: &ScoreRecord) -> bool {
    rule.has_score_condition()
        && rule.category.is_none_or(|c| c == record.category)
        && rule.min_spam_score.is_none_or(|min| record.spam_score >= min)
        && rule
            .min_importance_score
            .is_none_or(|min| record.importance_score >= min)
        && rule
            .max_importance_score
            .is_none_or(|max| record.importance_score <= max)
        && record.confidence >= rule.min_confidence
}

/// Check a record's numeric fields are within range.
///
/// # Errors
///
/// Returns [`InvalidScoreError`] naming the first field out of range. NaN
/// is always out of range.
pub fn validate_record(record: &ScoreRecord) -> Result<(), InvalidScoreError> {
    for (field, value) in [
        ("importance_score", record.importance_score),
        ("spam_score", record.spam_score),
    ] {
        if !SCORE_RANGE.contains(&value) {
            return Err(InvalidScoreError {
                field,
                value,
                range: "[0, 10]",
            });
        }
    }
    if !CONFIDENCE_RANGE.contains(&record.confidence) {
        return Err(InvalidScoreError {
            field: "confidence",
            value: record.confidence,
            range: "[0, 1]",
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy() -> LabelPolicy {
        LabelPolicy::new(&Config::default())
    }

    fn spam_policy() -> LabelPolicy {
        let mut config = Config::default();
        config.actions.enabled = true;
        config.actions.rules = vec![ActionRule {
            name: "auto_spam".to_string(),
            enabled: true,
            action: Action::MoveToSpam,
            category: None,
            min_spam_score: Some(9.5),
            min_importance_score: None,
            max_importance_score: None,
            min_confidence: 0.9,
        }];
        LabelPolicy::new(&config)
    }

    fn labels(items: &[Label]) -> BTreeSet<Label> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_orders_take_precedence_over_tier() {
        let record = ScoreRecord::new("a", 9.0, 1.0, Category::Orders, 0.9);
        let decision = policy().decide(&record).unwrap();

        assert_eq!(decision.labels, labels(&[Label::OrdersShipping]));
        assert!(!decision.labels.contains(&Label::HighImportance));
        assert!((decision.display_importance - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_category_labels() {
        let cases = [
            (Category::Travel, Label::Travel),
            (Category::Finance, Label::Finance),
            (Category::Calendar, Label::CalendarEvents),
            (Category::SoftwareLicense, Label::SoftwareLicense),
        ];
        for (category, label) in cases {
            let record = ScoreRecord::new("a", 8.5, 0.0, category, 0.9);
            assert_eq!(policy().decide(&record).unwrap().labels, labels(&[label]));
        }
    }

    #[test]
    fn test_importance_tiers() {
        let p = policy();
        let tier = |score: f64| {
            let record = ScoreRecord::new("a", score, 0.0, Category::Personal, 0.9);
            p.decide(&record).unwrap().labels
        };

        assert_eq!(tier(8.0), labels(&[Label::HighImportance]));
        assert_eq!(tier(7.99), labels(&[Label::MediumImportance]));
        assert_eq!(tier(5.0), labels(&[Label::MediumImportance]));
        assert_eq!(tier(4.99), labels(&[Label::LowImportance]));
        assert_eq!(tier(0.0), labels(&[Label::LowImportance]));
    }

    #[test]
    fn test_independent_label_composition() {
        let record = ScoreRecord::new("a", 9.0, 8.0, Category::Work, 0.3);
        let decision = policy().decide(&record).unwrap();

        assert_eq!(
            decision.labels,
            labels(&[Label::HighImportance, Label::LikelySpam, Label::NeedsReview])
        );
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn test_shipped_order_scenario() {
        let mut record = ScoreRecord::new("a", 6.0, 1.0, Category::Orders, 0.9);
        record.subject = "Your Amazon order has shipped".to_string();

        let decision = spam_policy().decide(&record).unwrap();
        assert_eq!(decision.labels, labels(&[Label::OrdersShipping]));
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn test_spam_scenario_proposes_move_to_spam() {
        let record = ScoreRecord::new("a", 1.0, 9.8, Category::Spam, 0.95);
        let decision = spam_policy().decide(&record).unwrap();

        assert_eq!(
            decision.labels,
            labels(&[Label::LowImportance, Label::LikelySpam])
        );
        assert_eq!(decision.actions.into_iter().collect::<Vec<_>>(), vec![Action::MoveToSpam]);
    }

    #[test]
    fn test_two_factor_gate_requires_both() {
        let p = spam_policy();

        let score_only = ScoreRecord::new("a", 1.0, 9.8, Category::Spam, 0.85);
        assert!(p.decide(&score_only).unwrap().actions.is_empty());

        let confidence_only = ScoreRecord::new("a", 1.0, 9.0, Category::Spam, 0.99);
        assert!(p.decide(&confidence_only).unwrap().actions.is_empty());

        let both_at_threshold = ScoreRecord::new("a", 1.0, 9.5, Category::Spam, 0.9);
        assert_eq!(p.decide(&both_at_threshold).unwrap().actions.len(), 1);
    }

    #[test]
    fn test_actions_disabled_globally() {
        let mut config = Config::default();
        for rule in &mut config.actions.rules {
            rule.enabled = true;
        }
        let p = LabelPolicy::new(&config);
        assert!(p.active_rules().is_empty());

        let record = ScoreRecord::new("a", 1.0, 10.0, Category::Spam, 1.0);
        assert!(p.decide(&record).unwrap().actions.is_empty());
    }

    #[test]
    fn test_newsletter_archive_rule() {
        let mut config = Config::default();
        config.actions.enabled = true;
        for rule in &mut config.actions.rules {
            rule.enabled = true;
        }
        let p = LabelPolicy::new(&config);

        let newsletter = ScoreRecord::new("a", 1.5, 2.0, Category::Newsletter, 0.85);
        let actions = p.decide(&newsletter).unwrap().actions;
        assert_eq!(actions.into_iter().collect::<Vec<_>>(), vec![Action::Archive]);

        let promo = ScoreRecord::new("a", 1.5, 2.0, Category::Promotion, 0.85);
        assert!(p.decide(&promo).unwrap().actions.is_empty());

        let important = ScoreRecord::new("a", 9.5, 0.0, Category::Work, 0.95);
        let actions = p.decide(&important).unwrap().actions;
        assert_eq!(actions.into_iter().collect::<Vec<_>>(), vec![Action::Star]);
    }

    #[test]
    fn test_priority_sender_forces_high_tier() {
        let mut config = Config::default();
        config.processing.priority_senders = vec!["@corp.example".to_string()];
        let p = LabelPolicy::new(&config);

        let mut record = ScoreRecord::new("a", 2.0, 0.0, Category::Work, 0.9);
        record.sender = "CEO <ceo@corp.example>".to_string();
        assert_eq!(p.decide(&record).unwrap().labels, labels(&[Label::HighImportance]));

        // Category labels still win.
        record.category = Category::Finance;
        assert_eq!(p.decide(&record).unwrap().labels, labels(&[Label::Finance]));
    }

    #[test]
    fn test_fallback_record_needs_review() {
        let mut record = ScoreRecord::new("a", 5.0, 0.0, Category::Notification, 0.0);
        record.needs_review = true;
        let decision = policy().decide(&record).unwrap();
        assert!(decision.labels.contains(&Label::NeedsReview));
        assert!(decision.labels.contains(&Label::MediumImportance));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let p = policy();

        let err = p
            .decide(&ScoreRecord::new("a", 10.5, 0.0, Category::Work, 0.5))
            .unwrap_err();
        assert_eq!(err.field, "importance_score");

        let err = p
            .decide(&ScoreRecord::new("a", 5.0, -0.1, Category::Work, 0.5))
            .unwrap_err();
        assert_eq!(err.field, "spam_score");

        let err = p
            .decide(&ScoreRecord::new("a", 5.0, 0.0, Category::Work, 1.01))
            .unwrap_err();
        assert_eq!(err.field, "confidence");

        assert!(
            p.decide(&ScoreRecord::new("a", f64::NAN, 0.0, Category::Work, 0.5))
                .is_err()
        );
    }

    fn any_category() -> impl Strategy<Value = Category> {
        prop::sample::select(Category::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn decide_is_deterministic(
            importance in 0.0f64..=10.0,
            spam in 0.0f64..=10.0,
            confidence in 0.0f64..=1.0,
            category in any_category(),
        ) {
            let p = spam_policy();
            let record = ScoreRecord::new("a", importance, spam, category, confidence);
            prop_assert_eq!(p.decide(&record).unwrap(), p.decide(&record.clone()).unwrap());
        }

        #[test]
        fn exactly_one_primary_label(
            importance in 0.0f64..=10.0,
            spam in 0.0f64..=10.0,
            confidence in 0.0f64..=1.0,
            category in any_category(),
        ) {
            let record = ScoreRecord::new("a", importance, spam, category, confidence);
            let decision = policy().decide(&record).unwrap();
            let primary = decision
                .labels
                .iter()
                .filter(|l| !matches!(l, Label::LikelySpam | Label::NeedsReview))
                .count();
            prop_assert_eq!(primary, 1);
        }

        #[test]
        fn actions_never_fire_below_confidence_floor(
            importance in 0.0f64..=10.0,
            spam in 0.0f64..=10.0,
            confidence in 0.0f64..0.9,
            category in any_category(),
        ) {
            let record = ScoreRecord::new("a", importance, spam, category, confidence);
            prop_assert!(spam_policy().decide(&record).unwrap().actions.is_empty());
        }

        #[test]
        fn out_of_range_importance_is_rejected(importance in 10.0001f64..1.0e6) {
            let record = ScoreRecord::new("a", importance, 0.0, Category::Work, 0.5);
            prop_assert!(policy().decide(&record).is_err());
        }
    }
}
