//! Feedback and accuracy report models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::policy::Label;
use crate::score::{Category, ImportanceBand};

/// What the user's behaviour says about a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The user acted in line with the classification.
    Confirmed,
    /// The user acted against it.
    Overridden,
    /// No usable signal.
    Ignored,
}

/// How much an outcome can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    /// Behaviour that only loosely implies agreement (archiving, leaving in inbox).
    Soft,
    /// Deliberate behaviour (starring, deleting, removing a label).
    Strong,
    /// A training label applied by the user.
    Explicit,
}

/// Outcome inferred for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Feedback {
    /// Outcome.
    pub outcome: Outcome,
    /// Strength, absent for ignored records.
    pub strength: Option<SignalStrength>,
}

impl Feedback {
    /// Confirmed with the given strength.
    #[must_use]
    pub const fn confirmed(strength: SignalStrength) -> Self {
        Self {
            outcome: Outcome::Confirmed,
            strength: Some(strength),
        }
    }

    /// Overridden with the given strength.
    #[must_use]
    pub const fn overridden(strength: SignalStrength) -> Self {
        Self {
            outcome: Outcome::Overridden,
            strength: Some(strength),
        }
    }

    /// No signal.
    #[must_use]
    pub const fn ignored() -> Self {
        Self {
            outcome: Outcome::Ignored,
            strength: None,
        }
    }
}

/// Outcome counts for one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BucketStats {
    /// Confirmed outcomes.
    pub confirmed: u32,
    /// Overridden outcomes.
    pub overridden: u32,
    /// Records without a signal.
    pub ignored: u32,
    /// Decided outcomes backed by an explicit training label.
    pub explicit: u32,
}

impl BucketStats {
    /// Count one outcome.
    pub fn add(&mut self, feedback: Feedback) {
        match feedback.outcome {
            Outcome::Confirmed => self.confirmed += 1,
            Outcome::Overridden => self.overridden += 1,
            Outcome::Ignored => self.ignored += 1,
        }
        if matches!(feedback.strength, Some(SignalStrength::Explicit)) {
            self.explicit += 1;
        }
    }

    /// Confirmed plus overridden.
    #[must_use]
    pub const fn decided(&self) -> u32 {
        self.confirmed + self.overridden
    }

    /// All records in the bucket.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.decided() + self.ignored
    }

    /// `confirmed / (confirmed + overridden)`, if anything was decided.
    #[must_use]
    pub fn accuracy(&self) -> Option<f64> {
        let decided = self.decided();
        (decided > 0).then(|| f64::from(self.confirmed) / f64::from(decided))
    }
}

/// How far the report can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceLevel {
    /// Too few decided outcomes to say anything.
    Insufficient,
    /// Some signal, below the sample minimum.
    Low,
    /// Enough samples, mostly implicit signals.
    Moderate,
    /// Many samples with a healthy share of explicit feedback.
    High,
}

impl EvidenceLevel {
    /// Grade evidence from decided and explicit counts.
    #[must_use]
    pub fn assess(decided: u32, explicit: u32, min_samples: u32) -> Self {
        let explicit_share = if decided == 0 {
            0.0
        } else {
            f64::from(explicit) / f64::from(decided)
        };

        if decided < 5 {
            Self::Insufficient
        } else if decided < min_samples {
            Self::Low
        } else if decided < min_samples.saturating_mul(3) || explicit_share < 0.25 {
            Self::Moderate
        } else {
            Self::High
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Insufficient => "insufficient",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    /// One-line caveat printed with the report.
    #[must_use]
    pub const fn caveat(&self) -> &'static str {
        match self {
            Self::Insufficient => {
                "Too little feedback to judge accuracy; apply Training-Data labels to help."
            }
            Self::Low => "Few decided outcomes; treat these numbers as anecdotal.",
            Self::Moderate => {
                "Mostly inferred from inbox behaviour (stars, deletes, archives), not explicit labels."
            }
            Self::High => "Backed by a good number of decided outcomes and explicit feedback.",
        }
    }
}

impl fmt::Display for EvidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A suggested tuning change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    /// Too much legitimate mail is flagged as spam.
    RaiseSpamThreshold {
        /// Current threshold.
        current: f64,
        /// Suggested threshold.
        suggested: f64,
        /// Accuracy of `Likely-Spam`.
        accuracy: f64,
    },
    /// Too much mail is marked high importance.
    RaiseHighThreshold {
        /// Current threshold.
        current: f64,
        /// Suggested threshold.
        suggested: f64,
        /// Accuracy of the high band.
        accuracy: f64,
    },
    /// Mail the user cares about falls below the medium tier.
    LowerMediumThreshold {
        /// Current threshold.
        current: f64,
        /// Suggested threshold.
        suggested: f64,
        /// Accuracy of the low band.
        accuracy: f64,
    },
    /// The prompt guidance for a category is not working.
    ReviseCategoryGuidance {
        /// Category concerned.
        category: Category,
        /// Accuracy for that category.
        accuracy: f64,
    },
    /// The model is mostly unsure.
    LowConfidence {
        /// Average confidence over the window.
        average: f64,
        /// Configured confidence threshold.
        threshold: f64,
    },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RaiseSpamThreshold {
                current,
                suggested,
                accuracy,
            } => write!(
                f,
                "Raise thresholds.spam from {current:.1} to {suggested:.1} (Likely-Spam accuracy {:.0}%)",
                accuracy * 100.0
            ),
            Self::RaiseHighThreshold {
                current,
                suggested,
                accuracy,
            } => write!(
                f,
                "Raise thresholds.high_importance from {current:.1} to {suggested:.1} (high band accuracy {:.0}%)",
                accuracy * 100.0
            ),
            Self::LowerMediumThreshold {
                current,
                suggested,
                accuracy,
            } => write!(
                f,
                "Lower thresholds.medium_importance from {current:.1} to {suggested:.1} (low band accuracy {:.0}%)",
                accuracy * 100.0
            ),
            Self::ReviseCategoryGuidance { category, accuracy } => write!(
                f,
                "Revisit the prompt guidance for '{category}' (accuracy {:.0}%)",
                accuracy * 100.0
            ),
            Self::LowConfidence { average, threshold } => write!(
                f,
                "Prompt yields low confidence (average {average:.2} against threshold {threshold:.2}); consider a larger model or clearer guidance"
            ),
        }
    }
}

/// Accuracy of past classifications, inferred from user behaviour.
#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    /// Window start.
    pub since: DateTime<Utc>,
    /// Window end.
    pub until: DateTime<Utc>,
    /// Records examined.
    pub total: u32,
    /// All observed records.
    pub overall: BucketStats,
    /// Per category.
    pub by_category: BTreeMap<Category, BucketStats>,
    /// Per importance band (display importance).
    pub by_band: BTreeMap<ImportanceBand, BucketStats>,
    /// Per applied label.
    pub by_label: BTreeMap<Label, BucketStats>,
    /// Records whose current state could not be read.
    pub unobservable: u32,
    /// Average model confidence.
    pub avg_confidence: f64,
    /// Evidence grade.
    pub evidence: EvidenceLevel,
    /// Suggested changes.
    pub recommendations: Vec<Recommendation>,
}

fn write_bucket(f: &mut fmt::Formatter<'_>, name: &str, stats: &BucketStats) -> fmt::Result {
    let accuracy = stats
        .accuracy()
        .map_or_else(|| "   n/a".to_string(), |a| format!("{:5.1}%", a * 100.0));
    writeln!(
        f,
        "  {name:18} {accuracy}  confirmed {:3}  overridden {:3}  ignored {:3}",
        stats.confirmed, stats.overridden, stats.ignored
    )
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Classification Accuracy")?;
        writeln!(f, "=======================")?;
        writeln!(
            f,
            "Window: {} to {}",
            self.since.format("%Y-%m-%d %H:%M"),
            self.until.format("%Y-%m-%d %H:%M UTC")
        )?;
        writeln!(f, "Records: {} ({} unobservable)", self.total, self.unobservable)?;
        writeln!(f, "Average confidence: {:.2}", self.avg_confidence)?;
        writeln!(f, "Evidence: {}. {}", self.evidence, self.evidence.caveat())?;
        writeln!(f)?;
        write_bucket(f, "overall", &self.overall)?;

        writeln!(f)?;
        writeln!(f, "By importance band:")?;
        for (band, stats) in &self.by_band {
            write_bucket(f, band.as_str(), stats)?;
        }

        writeln!(f)?;
        writeln!(f, "By category:")?;
        for (category, stats) in &self.by_category {
            write_bucket(f, category.as_str(), stats)?;
        }

        if !self.recommendations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Recommendations:")?;
            for rec in &self.recommendations {
                writeln!(f, "  - {rec}")?;
            }
        }
        Ok(())
    }
}
