//! Credit Score Types and Policy

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u32 = 300;
pub const MAX_SCORE: u32 = 850;

/// Banded classification of a credit score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

/// Lending terms granted to a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTerms {
    /// Maximum outstanding principal, in coins
    pub credit_limit: i64,
    pub interest_rate_pct: u32,
}

impl CreditTier {
    pub fn from_score(score: u32) -> Self {
        match score {
            s if s < 600 => CreditTier::Bronze,
            s if s < 700 => CreditTier::Silver,
            s if s < 750 => CreditTier::Gold,
            s if s < 800 => CreditTier::Platinum,
            _ => CreditTier::Diamond,
        }
    }

    pub fn terms(&self) -> TierTerms {
        let (credit_limit, interest_rate_pct) = match self {
            CreditTier::Bronze => (100, 20),
            CreditTier::Silver => (500, 15),
            CreditTier::Gold => (1_000, 10),
            CreditTier::Platinum => (2_500, 7),
            CreditTier::Diamond => (5_000, 5),
        };
        TierTerms {
            credit_limit,
            interest_rate_pct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditTier::Bronze => "bronze",
            CreditTier::Silver => "silver",
            CreditTier::Gold => "gold",
            CreditTier::Platinum => "platinum",
            CreditTier::Diamond => "diamond",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "bronze" => Some(CreditTier::Bronze),
            "silver" => Some(CreditTier::Silver),
            "gold" => Some(CreditTier::Gold),
            "platinum" => Some(CreditTier::Platinum),
            "diamond" => Some(CreditTier::Diamond),
            _ => None,
        }
    }
}

/// Scoring weights (governance-configurable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPolicy {
    /// Score of a user with no history
    pub base_score: u32,

    /// Points added per loan repaid on or before its due date
    pub on_time_bonus: u32,

    /// Points added per completed loan regardless of timing
    pub completion_bonus: u32,

    /// Points removed per late repayment or default
    pub late_penalty: u32,
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self {
            base_score: 600,
            on_time_bonus: 15,
            completion_bonus: 10,
            late_penalty: 40,
        }
    }
}

impl CreditPolicy {
    /// Score and tier from repayment history, clamped to [300, 850].
    pub fn recompute(
        &self,
        on_time_payments: u32,
        late_payments: u32,
        total_loans_completed: u32,
    ) -> (u32, CreditTier) {
        let raw = i64::from(self.base_score)
            + i64::from(on_time_payments) * i64::from(self.on_time_bonus)
            + i64::from(total_loans_completed) * i64::from(self.completion_bonus)
            - i64::from(late_payments) * i64::from(self.late_penalty);

        let score = raw.clamp(i64::from(MIN_SCORE), i64::from(MAX_SCORE)) as u32;
        (score, CreditTier::from_score(score))
    }

    /// `principal × (1 + rate/100)`, rounded up to a whole coin.
    pub fn total_due(principal: i64, interest_rate_pct: u32) -> i64 {
        let scaled = principal.saturating_mul(100 + i64::from(interest_rate_pct));
        (scaled + 99) / 100
    }
}

/// Per-user credit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditScore {
    pub user_id: String,
    pub score: u32,
    pub tier: CreditTier,
    pub credit_limit: i64,
    pub interest_rate_pct: u32,
    pub on_time_payments: u32,
    pub late_payments: u32,
    pub total_loans_completed: u32,
    pub updated_at: DateTime<Utc>,
}

impl CreditScore {
    pub fn new(user_id: String, policy: &CreditPolicy) -> Self {
        let mut score = Self {
            user_id,
            score: policy.base_score,
            tier: CreditTier::Silver,
            credit_limit: 0,
            interest_rate_pct: 0,
            on_time_payments: 0,
            late_payments: 0,
            total_loans_completed: 0,
            updated_at: Utc::now(),
        };
        score.refresh(policy);
        score
    }

    /// Re-derive score, tier and terms from the counters.
    pub fn refresh(&mut self, policy: &CreditPolicy) {
        let (score, tier) = policy.recompute(
            self.on_time_payments,
            self.late_payments,
            self.total_loans_completed,
        );
        let terms = tier.terms();

        self.score = score;
        self.tier = tier;
        self.credit_limit = terms.credit_limit;
        self.interest_rate_pct = terms.interest_rate_pct;
        self.updated_at = Utc::now();
    }

    pub fn record_repaid(&mut self, on_time: bool, policy: &CreditPolicy) {
        if on_time {
            self.on_time_payments += 1;
        } else {
            self.late_payments += 1;
        }
        self.total_loans_completed += 1;
        self.refresh(policy);
    }

    pub fn record_default(&mut self, policy: &CreditPolicy) {
        self.late_payments += 1;
        self.refresh(policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_is_silver() {
        let score = CreditScore::new("user_1".to_string(), &CreditPolicy::default());
        assert_eq!(score.score, 600);
        assert_eq!(score.tier, CreditTier::Silver);
        assert_eq!(score.credit_limit, 500);
        assert_eq!(score.interest_rate_pct, 15);
    }

    #[test]
    fn test_tier_bands() {
        assert_eq!(CreditTier::from_score(300), CreditTier::Bronze);
        assert_eq!(CreditTier::from_score(599), CreditTier::Bronze);
        assert_eq!(CreditTier::from_score(600), CreditTier::Silver);
        assert_eq!(CreditTier::from_score(700), CreditTier::Gold);
        assert_eq!(CreditTier::from_score(750), CreditTier::Platinum);
        assert_eq!(CreditTier::from_score(800), CreditTier::Diamond);
        assert_eq!(CreditTier::from_score(850), CreditTier::Diamond);
    }

    #[test]
    fn test_score_is_clamped() {
        let policy = CreditPolicy::default();
        assert_eq!(policy.recompute(0, 50, 0).0, MIN_SCORE);
        assert_eq!(policy.recompute(100, 0, 100).0, MAX_SCORE);
    }

    #[test]
    fn test_repayment_history_moves_score() {
        let policy = CreditPolicy::default();
        let mut score = CreditScore::new("user_1".to_string(), &policy);

        score.record_repaid(true, &policy);
        assert_eq!(score.score, 625);

        score.record_default(&policy);
        assert_eq!(score.score, 585);
        assert_eq!(score.tier, CreditTier::Bronze);
        assert_eq!(score.credit_limit, 100);
    }

    #[test]
    fn test_total_due_rounds_up() {
        assert_eq!(CreditPolicy::total_due(100, 15), 115);
        assert_eq!(CreditPolicy::total_due(7, 15), 9);
        assert_eq!(CreditPolicy::total_due(100, 0), 100);
    }
}
