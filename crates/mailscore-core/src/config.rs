//! Configuration passed explicitly into every component.
//!
//! Loaded from a TOML file; every section and field has a default so a
//! partial file (or none at all) is valid.
//!
//! ```toml
//! [inference]
//! base_url = "http://localhost:1234/v1"
//! model = "qwen3-32b"
//!
//! [thresholds]
//! spam = 7.5
//!
//! [actions]
//! enabled = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::policy::Action;
use crate::score::{CONFIDENCE_RANGE, Category, SCORE_RANGE};
use crate::{Error, Result};

/// Longest look-back accepted for windows and reports, in hours (ten years).
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 3650;

/// Longest look-back accepted for reports, in days.
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Longest batch lock lifetime, in seconds (one week).
pub const MAX_LOCK_TTL_SECS: i64 = 7 * 24 * 3600;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inference endpoint settings.
    pub inference: InferenceConfig,
    /// Label thresholds.
    pub thresholds: Thresholds,
    /// Label naming.
    pub labels: LabelConfig,
    /// Gated auto-actions.
    pub actions: ActionConfig,
    /// Batch processing.
    pub processing: ProcessingConfig,
    /// Score database.
    pub storage: StorageConfig,
    /// Local mailbox snapshot.
    pub mailbox: MailboxConfig,
    /// Reporting.
    pub report: ReportConfig,
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Load a configuration file, falling back to defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be loaded.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        let inference = &self.inference;
        if inference.base_url.trim().is_empty() {
            return Err(invalid("inference.base_url must be non-empty."));
        }
        if inference.model.trim().is_empty() {
            return Err(invalid("inference.model must be non-empty."));
        }
        if inference.timeout_secs == 0 {
            return Err(invalid("inference.timeout_secs must be greater than zero."));
        }
        if inference.max_body_chars == 0 {
            return Err(invalid("inference.max_body_chars must be greater than zero."));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("thresholds.high_importance", t.high_importance),
            ("thresholds.medium_importance", t.medium_importance),
            ("thresholds.spam", t.spam),
        ] {
            if !SCORE_RANGE.contains(&value) {
                return Err(invalid(&format!("{name} must be within 0-10.")));
            }
        }
        if t.medium_importance > t.high_importance {
            return Err(invalid(
                "thresholds.medium_importance must not exceed thresholds.high_importance.",
            ));
        }
        if !CONFIDENCE_RANGE.contains(&t.confidence) {
            return Err(invalid("thresholds.confidence must be within 0-1."));
        }

        if self.labels.prefix.ends_with('/') {
            return Err(invalid("labels.prefix must not end with '/'."));
        }

        for rule in &self.actions.rules {
            rule.validate()?;
        }

        if self.processing.max_emails_per_batch == 0 {
            return Err(invalid(
                "processing.max_emails_per_batch must be greater than zero.",
            ));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.processing.default_hours_back) {
            return Err(invalid(&format!(
                "processing.default_hours_back must be within 1-{MAX_LOOKBACK_HOURS}."
            )));
        }
        if !(1..=MAX_LOCK_TTL_SECS).contains(&self.processing.lock_ttl_secs) {
            return Err(invalid(&format!(
                "processing.lock_ttl_secs must be within 1-{MAX_LOCK_TTL_SECS}."
            )));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.report.days_back) {
            return Err(invalid(&format!(
                "report.days_back must be within 1-{MAX_LOOKBACK_DAYS}."
            )));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// OpenAI-compatible inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL, e.g. `http://localhost:1234/v1`.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Bearer token; local servers accept anything.
    pub api_key: String,
    /// Per-attempt timeout.
    pub timeout_secs: u64,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token limit.
    pub max_tokens: u32,
    /// Body truncation limit, in characters.
    pub max_body_chars: usize,
    /// Extra attempts after the first failure.
    pub max_retries: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "qwen3-32b".to_string(),
            api_key: "lm-studio".to_string(),
            timeout_secs: 60,
            temperature: 0.1,
            max_tokens: 200,
            max_body_chars: 1500,
            max_retries: 2,
        }
    }
}

/// Score thresholds used by the label policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Importance at or above which mail is High-Importance.
    pub high_importance: f64,
    /// Importance at or above which mail is Medium-Importance.
    pub medium_importance: f64,
    /// Spam score at or above which mail is Likely-Spam.
    pub spam: f64,
    /// Confidence below which mail needs review.
    pub confidence: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high_importance: 8.0,
            medium_importance: 5.0,
            spam: 7.0,
            confidence: 0.6,
        }
    }
}

/// Label naming on the mail store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelConfig {
    /// Parent label all scorer labels live under.
    pub prefix: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: "EmailScorer".to_string(),
        }
    }
}

/// Gated auto-actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// Master switch; no action is ever proposed while false.
    pub enabled: bool,
    /// Individual rules.
    pub rules: Vec<ActionRule>,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rules: ActionRule::defaults(),
        }
    }
}

/// A two-factor rule: score conditions plus a confidence floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRule {
    /// Rule name for logs.
    pub name: String,
    /// Whether this rule is active.
    #[serde(default)]
    pub enabled: bool,
    /// Action to propose.
    pub action: Action,
    /// Only match this category.
    #[serde(default)]
    pub category: Option<Category>,
    /// Spam score must be at least this.
    #[serde(default)]
    pub min_spam_score: Option<f64>,
    /// Importance must be at least this.
    #[serde(default)]
    pub min_importance_score: Option<f64>,
    /// Importance must be at most this.
    #[serde(default)]
    pub max_importance_score: Option<f64>,
    /// Confidence must be at least this.
    pub min_confidence: f64,
}

impl ActionRule {
    /// The stock rules, all disabled.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self {
                name: "auto_spam".to_string(),
                enabled: false,
                action: Action::MoveToSpam,
                category: None,
                min_spam_score: Some(9.5),
                min_importance_score: None,
                max_importance_score: None,
                min_confidence: 0.9,
            },
            Self {
                name: "auto_archive_newsletters".to_string(),
                enabled: false,
                action: Action::Archive,
                category: Some(Category::Newsletter),
                min_spam_score: None,
                min_importance_score: None,
                max_importance_score: Some(2.0),
                min_confidence: 0.8,
            },
            Self {
                name: "auto_star_important".to_string(),
                enabled: false,
                action: Action::Star,
                category: None,
                min_spam_score: None,
                min_importance_score: Some(9.0),
                max_importance_score: None,
                min_confidence: 0.9,
            },
        ]
    }

    /// Whether the rule has at least one score condition.
    #[must_use]
    pub const fn has_score_condition(&self) -> bool {
        self.min_spam_score.is_some()
            || self.min_importance_score.is_some()
            || self.max_importance_score.is_some()
    }

    fn validate(&self) -> Result<()> {
        if !self.has_score_condition() {
            return Err(invalid(&format!(
                "actions rule '{}' needs a score condition in addition to min_confidence.",
                self.name
            )));
        }
        if !CONFIDENCE_RANGE.contains(&self.min_confidence) || self.min_confidence <= 0.0 {
            return Err(invalid(&format!(
                "actions rule '{}': min_confidence must be within (0, 1].",
                self.name
            )));
        }
        for value in [
            self.min_spam_score,
            self.min_importance_score,
            self.max_importance_score,
        ]
        .into_iter()
        .flatten()
        {
            if !SCORE_RANGE.contains(&value) {
                return Err(invalid(&format!(
                    "actions rule '{}': score conditions must be within 0-10.",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Batch processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Window length used when no window has been recorded yet.
    pub default_hours_back: i64,
    /// Maximum emails pulled per batch.
    pub max_emails_per_batch: usize,
    /// Skip emails that already have a score record.
    pub skip_processed: bool,
    /// Pause between emails, in milliseconds.
    pub delay_ms: u64,
    /// Interval between batches in continuous mode.
    pub continuous_interval_secs: u64,
    /// Pause after a failed batch in continuous mode.
    pub retry_delay_secs: u64,
    /// Age after which a held batch lock is considered abandoned.
    pub lock_ttl_secs: i64,
    /// Senders never scored (`addr@host` or `@domain`).
    pub skip_senders: Vec<String>,
    /// Senders always placed in the high-importance tier.
    pub priority_senders: Vec<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            default_hours_back: 1,
            max_emails_per_batch: 100,
            skip_processed: true,
            delay_ms: 100,
            continuous_interval_secs: 900,
            retry_delay_secs: 60,
            lock_ttl_secs: 3600,
            skip_senders: Vec::new(),
            priority_senders: Vec::new(),
        }
    }
}

/// Whether a sender address matches any `addr@host` or `@domain` pattern.
#[must_use]
pub fn matches_sender(patterns: &[String], address: &str) -> bool {
    let address = address.to_lowercase();
    patterns.iter().any(|pattern| {
        let pattern = pattern.trim().to_lowercase();
        if pattern.is_empty() {
            false
        } else if pattern.starts_with('@') {
            address.ends_with(&pattern)
        } else {
            address == pattern
        }
    })
}

/// Score database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; the CLI picks a per-user data directory when unset.
    pub database_path: Option<PathBuf>,
}

/// Local mailbox snapshot location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// JSON mailbox file; the CLI picks a per-user data directory when unset.
    pub path: Option<PathBuf>,
}

/// Reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Days covered by reports.
    pub days_back: i64,
    /// Decided outcomes needed before a bucket drives a recommendation.
    pub min_samples: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            days_back: 7,
            min_samples: 20,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
        let parsed = Config::from_toml("").unwrap();
        assert_eq!(parsed.inference.model, "qwen3-32b");
        assert_eq!(parsed.actions.rules.len(), 3);
        assert!(!parsed.actions.enabled);
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = Config::from_toml(
            r#"
            [inference]
            model = "llama-3.1-8b"
            max_body_chars = 800

            [thresholds]
            spam = 8.0

            [processing]
            priority_senders = ["@corp.example"]
            "#,
        )
        .unwrap();

        assert_eq!(config.inference.model, "llama-3.1-8b");
        assert_eq!(config.inference.max_body_chars, 800);
        assert_eq!(config.inference.base_url, "http://localhost:1234/v1");
        assert!((config.thresholds.spam - 8.0).abs() < f64::EPSILON);
        assert!((config.thresholds.high_importance - 8.0).abs() < f64::EPSILON);
        assert_eq!(config.processing.priority_senders, vec!["@corp.example"]);
    }

    #[test]
    fn test_action_rule_from_toml() {
        let config = Config::from_toml(
            r#"
            [actions]
            enabled = true

            [[actions.rules]]
            name = "spam"
            enabled = true
            action = "move_to_spam"
            min_spam_score = 9.5
            min_confidence = 0.9
            "#,
        )
        .unwrap();

        assert!(config.actions.enabled);
        assert_eq!(config.actions.rules.len(), 1);
        assert_eq!(config.actions.rules[0].action, Action::MoveToSpam);
    }

    #[test]
    fn test_rule_without_score_condition_is_rejected() {
        let err = Config::from_toml(
            r#"
            [[actions.rules]]
            name = "confidence-only"
            enabled = true
            action = "archive"
            min_confidence = 0.99
            "#,
        )
        .unwrap_err();

        assert!(matches!(err, Error::Config(msg) if msg.contains("confidence-only")));
    }

    #[test]
    fn test_threshold_validation() {
        let mut config = Config::default();
        config.thresholds.medium_importance = 9.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.thresholds.confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.labels.prefix = "EmailScorer/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_bounds() {
        let err = Config::from_toml(&format!(
            "[processing]\nlock_ttl_secs = {}",
            i64::MAX
        ))
        .unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("lock_ttl_secs")));

        for (section, field, value) in [
            ("processing", "lock_ttl_secs", -1),
            ("processing", "lock_ttl_secs", 0),
            ("processing", "default_hours_back", i64::MAX),
            ("report", "days_back", 100_000),
        ] {
            let raw = format!("[{section}]\n{field} = {value}");
            assert!(Config::from_toml(&raw).is_err(), "{field} = {value} accepted");
        }

        let at_limit = format!("[processing]\nlock_ttl_secs = {MAX_LOCK_TTL_SECS}");
        Config::from_toml(&at_limit).unwrap();
    }

    #[test]
    fn test_matches_sender() {
        let patterns = vec!["boss@corp.example".to_string(), "@bank.example".to_string()];
        assert!(matches_sender(&patterns, "Boss@Corp.example"));
        assert!(matches_sender(&patterns, "alerts@bank.example"));
        assert!(!matches_sender(&patterns, "someone@corp.example"));
        assert!(!matches_sender(&[], "a@b.c"));
    }
}
