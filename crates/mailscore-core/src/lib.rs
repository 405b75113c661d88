//! # mailscore-core
//!
//! Core logic for `mailscore`, a local-LLM email scorer.
//!
//! This crate provides:
//! - **Classifier** - prompt building, strict reply parsing, retry and fallback
//! - **Label Policy** - deterministic labels and confidence-gated actions
//! - **Processing Ledger** - scored-email records and the processing window (`SQLite`)
//! - **Feedback Loop** - accuracy inferred from how the user treats labelled mail
//! - **Pipeline** - the batch driver tying a mail store to the above
//! - Mail-store abstraction with a JSON mailbox snapshot implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod classifier;
pub mod config;
mod error;
pub mod feedback;
pub mod ledger;
pub mod mail;
pub mod pipeline;
pub mod policy;
pub mod score;

pub use classifier::{
    ClassificationError, Classifier, InferenceClient, InferenceError, OpenAiClient, ParseError,
    Prompt,
};
pub use config::{
    ActionConfig, ActionRule, Config, InferenceConfig, LabelConfig, MailboxConfig,
    ProcessingConfig, ReportConfig, StorageConfig, Thresholds,
};
pub use error::{Error, Result};
pub use feedback::{AccuracyReport, EvidenceLevel, FeedbackAnalyzer, Outcome, Recommendation};
pub use ledger::{BatchLock, Ledger};
pub use mail::{Email, Folder, MailStore, MailStoreError, MailboxFile, MessageState};
pub use pipeline::{BatchParams, BatchSummary, ScoringPipeline};
pub use policy::{Action, Decision, InvalidScoreError, Label, LabelPolicy};
pub use score::{Category, ImportanceBand, ScoreRecord, ScoreRepository, ScoringStats};
