//! Label policy data models.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A label the scorer manages on the mail store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Label {
    /// Importance at or above the high threshold.
    HighImportance,
    /// Importance between the medium and high thresholds.
    MediumImportance,
    /// Importance below the medium threshold.
    LowImportance,
    /// Orders, shipping and delivery.
    OrdersShipping,
    /// Travel bookings and itineraries.
    Travel,
    /// Banking, invoices, receipts.
    Finance,
    /// Invites and event reminders.
    CalendarEvents,
    /// Licence keys and renewals.
    SoftwareLicense,
    /// Spam score at or above the spam threshold.
    LikelySpam,
    /// Low confidence or failed classification.
    NeedsReview,
    /// Applied by the user to confirm a classification.
    TrainingCorrect,
    /// Applied by the user to reject a classification.
    TrainingIncorrect,
}

impl Label {
    /// Every label, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::HighImportance,
        Self::MediumImportance,
        Self::LowImportance,
        Self::OrdersShipping,
        Self::Travel,
        Self::Finance,
        Self::CalendarEvents,
        Self::SoftwareLicense,
        Self::LikelySpam,
        Self::NeedsReview,
        Self::TrainingCorrect,
        Self::TrainingIncorrect,
    ];

    /// Name below the scorer prefix.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::HighImportance => "High-Importance",
            Self::MediumImportance => "Medium-Importance",
            Self::LowImportance => "Low-Importance",
            Self::OrdersShipping => "Orders-Shipping",
            Self::Travel => "Travel",
            Self::Finance => "Finance",
            Self::CalendarEvents => "Calendar-Events",
            Self::SoftwareLicense => "Software-License",
            Self::LikelySpam => "Likely-Spam",
            Self::NeedsReview => "Needs-Review",
            Self::TrainingCorrect => "Training-Data/Correct",
            Self::TrainingIncorrect => "Training-Data/Incorrect",
        }
    }

    /// Background colour (from the palette mail stores commonly allow).
    #[must_use]
    pub const fn color(&self) -> &'static str {
        match self {
            Self::HighImportance => "#cc3a21",
            Self::MediumImportance => "#f2c960",
            Self::LowImportance => "#cccccc",
            Self::OrdersShipping => "#4a86e8",
            Self::Travel | Self::TrainingCorrect => "#16a766",
            Self::Finance | Self::LikelySpam => "#ffad47",
            Self::CalendarEvents | Self::NeedsReview => "#8e63ce",
            Self::SoftwareLicense | Self::TrainingIncorrect => "#e66550",
        }
    }

    /// Full label name under `prefix`.
    #[must_use]
    pub fn qualified(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.name().to_string()
        } else {
            format!("{prefix}/{}", self.name())
        }
    }

    /// Resolve a full label name back to a label.
    #[must_use]
    pub fn from_qualified(prefix: &str, full: &str) -> Option<Self> {
        let name = if prefix.is_empty() {
            full
        } else {
            full.strip_prefix(prefix)?.strip_prefix('/')?
        };
        Self::ALL.into_iter().find(|label| label.name() == name)
    }

    /// Whether this is one of the three importance tiers.
    #[must_use]
    pub const fn is_tier(&self) -> bool {
        matches!(
            self,
            Self::HighImportance | Self::MediumImportance | Self::LowImportance
        )
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A side-effecting action the policy may propose.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Move the message to spam.
    MoveToSpam,
    /// Archive the message.
    Archive,
    /// Star the message.
    Star,
}

impl Action {
    /// Human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MoveToSpam => "move-to-spam",
            Self::Archive => "archive",
            Self::Star => "star",
        }
    }

    /// Parse a name produced by [`Action::as_str`].
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "move-to-spam" => Some(Self::MoveToSpam),
            "archive" => Some(Self::Archive),
            "star" => Some(Self::Star),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the label policy for one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Labels to apply.
    pub labels: BTreeSet<Label>,
    /// Actions to perform.
    pub actions: BTreeSet<Action>,
    /// Importance to show in reports (orders are pinned to 6–7).
    pub display_importance: f64,
}

impl Decision {
    /// Label names qualified with `prefix`, in label order.
    #[must_use]
    pub fn qualified_labels(&self, prefix: &str) -> Vec<String> {
        self.labels.iter().map(|l| l.qualified(prefix)).collect()
    }
}

/// A record whose numeric fields are outside their ranges.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Invalid score: {field} = {value} is outside {range}")]
pub struct InvalidScoreError {
    /// Offending field.
    pub field: &'static str,
    /// Offending value.
    pub value: f64,
    /// Allowed range, for display.
    pub range: &'static str,
}
