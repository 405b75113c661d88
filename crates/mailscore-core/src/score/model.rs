//! Score record data models.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mail::Email;
use crate::policy::Action;

/// Importance score range shared by importance and spam scores.
pub const SCORE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=10.0;

/// Confidence range.
pub const CONFIDENCE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=1.0;

/// Display range for order/shipping mail, whatever the model said.
const ORDERS_DISPLAY_RANGE: (f64, f64) = (6.0, 7.0);

/// Closed set of categories the model may assign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Colleagues, clients, work tooling.
    Work,
    /// Friends and family.
    Personal,
    /// Order confirmations, shipping and delivery updates.
    Orders,
    /// Subscribed newsletters.
    Newsletter,
    /// Marketing and promotions.
    Promotion,
    /// Unsolicited or suspicious mail.
    Spam,
    /// Automated notifications.
    Notification,
    /// Flights, hotels, itineraries.
    Travel,
    /// Banking, invoices, receipts, tax documents.
    Finance,
    /// Meeting invites, reminders, RSVPs.
    Calendar,
    /// Activation keys, licence certificates, renewals.
    SoftwareLicense,
}

impl Category {
    /// Every category, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::Work,
        Self::Personal,
        Self::Orders,
        Self::Newsletter,
        Self::Promotion,
        Self::Spam,
        Self::Notification,
        Self::Travel,
        Self::Finance,
        Self::Calendar,
        Self::SoftwareLicense,
    ];

    /// Parse a category name.
    ///
    /// Matching is case-insensitive and treats `-` and spaces as `_`, so
    /// `"Software License"` and `"software-license"` both resolve. Anything
    /// outside the closed set yields `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        match normalized.as_str() {
            "work" => Some(Self::Work),
            "personal" => Some(Self::Personal),
            "orders" => Some(Self::Orders),
            "newsletter" => Some(Self::Newsletter),
            "promotion" => Some(Self::Promotion),
            "spam" => Some(Self::Spam),
            "notification" => Some(Self::Notification),
            "travel" => Some(Self::Travel),
            "finance" => Some(Self::Finance),
            "calendar" => Some(Self::Calendar),
            "software_license" => Some(Self::SoftwareLicense),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Orders => "orders",
            Self::Newsletter => "newsletter",
            Self::Promotion => "promotion",
            Self::Spam => "spam",
            Self::Notification => "notification",
            Self::Travel => "travel",
            Self::Finance => "finance",
            Self::Calendar => "calendar",
            Self::SoftwareLicense => "software_license",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown category: {0:?}")]
pub struct UnknownCategory(pub String);

impl std::str::FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Coarse importance band used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportanceBand {
    /// Below the medium threshold.
    Low,
    /// Between the medium and high thresholds.
    Medium,
    /// At or above the high threshold.
    High,
}

impl ImportanceBand {
    /// Place a score in a band given the tier thresholds.
    #[must_use]
    pub fn from_score(score: f64, high: f64, medium: f64) -> Self {
        if score >= high {
            Self::High
        } else if score >= medium {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for ImportanceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification result for a single email.
///
/// Records are never mutated once stored. A reprocess pass writes a new row
/// for the same `email_id`; lookups see the latest one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRecord {
    /// Row identifier (None until stored).
    pub id: Option<i64>,
    /// Mail-store identifier of the scored email.
    pub email_id: String,
    /// Sender at scoring time.
    pub sender: String,
    /// Subject at scoring time.
    pub subject: String,
    /// Importance, 0 to 10.
    pub importance_score: f64,
    /// Likelihood of spam, 0 to 10.
    pub spam_score: f64,
    /// Assigned category.
    pub category: Category,
    /// Model confidence, 0 to 1.
    pub confidence: f64,
    /// Short explanation from the model, or the failure reason.
    pub reasoning: String,
    /// Set when the record is the fallback for a failed classification.
    pub needs_review: bool,
    /// Model identifier that produced the score.
    pub model: String,
    /// When the email was scored.
    pub scored_at: DateTime<Utc>,
    /// Label names actually applied on the mail store.
    pub labels_applied: BTreeSet<String>,
    /// Actions the scorer has taken on the message, this pass or earlier.
    ///
    /// Mailbox state these explain is not user feedback.
    pub actions_taken: BTreeSet<Action>,
}

impl ScoreRecord {
    /// Creates a record with the given scores, stamped now.
    #[must_use]
    pub fn new(
        email_id: impl Into<String>,
        importance_score: f64,
        spam_score: f64,
        category: Category,
        confidence: f64,
    ) -> Self {
        Self {
            id: None,
            email_id: email_id.into(),
            sender: String::new(),
            subject: String::new(),
            importance_score,
            spam_score,
            category,
            confidence,
            reasoning: String::new(),
            needs_review: false,
            model: String::new(),
            scored_at: Utc::now(),
            labels_applied: BTreeSet::new(),
            actions_taken: BTreeSet::new(),
        }
    }

    /// The safe record stored when an email could not be classified.
    ///
    /// Confidence is zero so the policy always flags it for review.
    #[must_use]
    pub fn fallback(email: &Email, model: &str, reason: &str) -> Self {
        Self {
            sender: email.sender.clone(),
            subject: email.subject.clone(),
            reasoning: format!("classification failed: {reason}"),
            needs_review: true,
            model: model.to_string(),
            ..Self::new(email.id.clone(), 5.0, 0.0, Category::Notification, 0.0)
        }
    }

    /// Sets sender and subject from the source email.
    #[must_use]
    pub fn for_email(mut self, email: &Email) -> Self {
        self.email_id.clone_from(&email.id);
        self.sender.clone_from(&email.sender);
        self.subject.clone_from(&email.subject);
        self
    }

    /// Importance as shown in reports.
    ///
    /// Orders are pinned to the 6–7 range for display; the stored score is
    /// left as the model produced it.
    #[must_use]
    pub fn display_importance(&self) -> f64 {
        if self.category == Category::Orders {
            self.importance_score
                .clamp(ORDERS_DISPLAY_RANGE.0, ORDERS_DISPLAY_RANGE.1)
        } else {
            self.importance_score
        }
    }

    /// Labels applied, comma-joined for storage.
    #[must_use]
    pub fn labels_csv(&self) -> String {
        self.labels_applied
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Actions taken, comma-joined for storage.
    #[must_use]
    pub fn actions_csv(&self) -> String {
        self.actions_taken
            .iter()
            .map(Action::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a comma-joined action list, dropping unknown names.
    #[must_use]
    pub fn parse_actions(csv: &str) -> BTreeSet<Action> {
        csv.split(',').filter_map(Action::parse).collect()
    }

    /// Parse a comma-joined label list.
    #[must_use]
    pub fn parse_labels(csv: &str) -> BTreeSet<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
    }

    #[test]
    fn test_category_parse_is_lenient_on_case_and_separators() {
        assert_eq!(Category::parse("Work"), Some(Category::Work));
        assert_eq!(
            Category::parse("Software License"),
            Some(Category::SoftwareLicense)
        );
        assert_eq!(
            Category::parse("software-license"),
            Some(Category::SoftwareLicense)
        );
    }

    #[test]
    fn test_category_parse_rejects_unknown() {
        assert_eq!(Category::parse("unknown"), None);
        assert_eq!(Category::parse(""), None);
        assert!("shopping".parse::<Category>().is_err());
    }

    #[test]
    fn test_display_importance_clamps_orders_only() {
        let order = ScoreRecord::new("a", 9.0, 1.0, Category::Orders, 0.9);
        assert!((order.display_importance() - 7.0).abs() < f64::EPSILON);
        assert!((order.importance_score - 9.0).abs() < f64::EPSILON);

        let low_order = ScoreRecord::new("b", 2.0, 1.0, Category::Orders, 0.9);
        assert!((low_order.display_importance() - 6.0).abs() < f64::EPSILON);

        let work = ScoreRecord::new("c", 9.0, 1.0, Category::Work, 0.9);
        assert!((work.display_importance() - 9.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_importance_band() {
        assert_eq!(ImportanceBand::from_score(8.0, 8.0, 5.0), ImportanceBand::High);
        assert_eq!(ImportanceBand::from_score(7.9, 8.0, 5.0), ImportanceBand::Medium);
        assert_eq!(ImportanceBand::from_score(5.0, 8.0, 5.0), ImportanceBand::Medium);
        assert_eq!(ImportanceBand::from_score(4.9, 8.0, 5.0), ImportanceBand::Low);
    }

    #[test]
    fn test_labels_csv_roundtrip() {
        let mut record = ScoreRecord::new("a", 1.0, 1.0, Category::Work, 1.0);
        record.labels_applied.insert("EmailScorer/Travel".into());
        record.labels_applied.insert("EmailScorer/Likely-Spam".into());

        let csv = record.labels_csv();
        assert_eq!(ScoreRecord::parse_labels(&csv), record.labels_applied);
        assert!(ScoreRecord::parse_labels("").is_empty());
    }

    #[test]
    fn test_actions_csv() {
        let mut record = ScoreRecord::new("a", 9.5, 0.0, Category::Work, 0.95);
        assert_eq!(record.actions_csv(), "");
        record.actions_taken.insert(Action::Star);
        record.actions_taken.insert(Action::MoveToSpam);

        assert_eq!(record.actions_csv(), "move-to-spam,star");
        assert_eq!(ScoreRecord::parse_actions("move-to-spam,star"), record.actions_taken);
        assert!(ScoreRecord::parse_actions("").is_empty());
        assert!(ScoreRecord::parse_actions("delete").is_empty());
    }
}
