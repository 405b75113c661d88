//! Label policy - deterministic mapping from a score record to labels and
//! gated actions.
//!
//! Rules, in precedence order:
//! 1. Category labels (`orders`, `travel`, `finance`, `calendar`,
//!    `software_license`) replace the importance tier.
//! 2. Otherwise one importance tier: High, Medium or Low.
//! 3. `Likely-Spam` and `Needs-Review` are added independently.
//!
//! Actions (move to spam, archive, star) are proposed only when a rule's
//! score condition *and* its confidence floor both hold.
//!
//! # Example
//!
//! ```ignore
//! use mailscore_core::{Category, Config, LabelPolicy, ScoreRecord};
//!
//! let policy = LabelPolicy::new(&Config::default());
//! let record = ScoreRecord::new("msg-1", 9.0, 8.0, Category::Work, 0.3);
//! let decision = policy.decide(&record)?;
//! // High-Importance, Likely-Spam, Needs-Review
//! ```

mod engine;
mod model;

pub use engine::{LabelPolicy, validate_record};
pub use model::{Action, Decision, InvalidScoreError, Label};
