//! Credit Risk Model
//!
//! Derives a score, tier, credit limit and interest rate from a user's loan
//! repayment history. Everything here is a pure function of the counters on
//! `CreditScore`; the loan state machine is the only caller that changes them.
//!
//! ## Score Model
//!
//! - Every user starts at `base_score` (600, silver)
//! - On-time repayments and completed loans raise the score
//! - Late repayments and defaults lower it
//! - The result is clamped to [300, 850]
//!
//! ```text
//! score:  300 ──── 600 ──── 700 ──── 750 ──── 800 ──── 850
//! tier:     bronze   silver    gold   platinum  diamond
//! ```

mod score;

pub use score::{CreditPolicy, CreditScore, CreditTier, TierTerms, MAX_SCORE, MIN_SCORE};
