//! Feedback loop - how well past classifications held up.
//!
//! Feedback is never stored. It is derived on demand by comparing the
//! labels recorded on each [`ScoreRecord`](crate::score::ScoreRecord) with
//! the message's current state in the mail store.

mod analyzer;
mod model;

pub use analyzer::{FeedbackAnalyzer, infer_outcome};
pub use model::{
    AccuracyReport, BucketStats, EvidenceLevel, Feedback, Outcome, Recommendation, SignalStrength,
};
