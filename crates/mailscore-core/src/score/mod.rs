//! Score records and their persistence.
//!
//! A [`ScoreRecord`] is the structured result of classifying one email.
//! Records are append-only: a reprocess pass writes a new row and lookups
//! see the latest one.

mod model;
mod repository;

pub use model::{
    CONFIDENCE_RANGE, Category, ImportanceBand, SCORE_RANGE, ScoreRecord, UnknownCategory,
};
pub use repository::{ScoreRepository, ScoringStats};
pub(crate) use repository::{parse_timestamp, timestamp};
