//! Loan records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::credit::CreditPolicy;

/// `active → {repaid | defaulted}`; both outcomes are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Repaid,
    Defaulted,
}

impl LoanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoanStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "active",
            LoanStatus::Repaid => "repaid",
            LoanStatus::Defaulted => "defaulted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(LoanStatus::Active),
            "repaid" => Some(LoanStatus::Repaid),
            "defaulted" => Some(LoanStatus::Defaulted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: Uuid,
    pub user_id: String,
    pub principal: i64,
    pub term_days: u32,
    pub interest_rate_pct: u32,
    /// Principal plus interest
    pub total_due: i64,
    pub amount_repaid: i64,
    /// Coins collected from the balance when the loan defaulted
    pub recovered_on_default: i64,
    pub payments_made: u32,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn new(
        user_id: String,
        principal: i64,
        term_days: u32,
        interest_rate_pct: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            principal,
            term_days,
            interest_rate_pct,
            total_due: CreditPolicy::total_due(principal, interest_rate_pct),
            amount_repaid: 0,
            recovered_on_default: 0,
            payments_made: 0,
            status: LoanStatus::Active,
            created_at: now,
            due_date: now + Duration::days(i64::from(term_days)),
            resolved_at: None,
        }
    }

    pub fn outstanding(&self) -> i64 {
        (self.total_due - self.amount_repaid).max(0)
    }

    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && now > self.due_date && self.amount_repaid < self.total_due
    }

    /// Reference id for the next repayment posting.
    pub fn next_payment_reference(&self) -> String {
        format!("{}:payment:{}", self.id, self.payments_made + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_loan_terms() {
        let now = Utc::now();
        let loan = Loan::new("user_1".to_string(), 100, 14, 15, now);

        assert_eq!(loan.total_due, 115);
        assert_eq!(loan.outstanding(), 115);
        assert_eq!(loan.due_date, now + Duration::days(14));
        assert!(loan.is_active());
    }

    #[test]
    fn test_overdue_only_while_active() {
        let now = Utc::now();
        let mut loan = Loan::new("user_1".to_string(), 100, 7, 15, now);

        assert!(!loan.is_overdue(now + Duration::days(7)));
        assert!(loan.is_overdue(now + Duration::days(8)));

        loan.status = LoanStatus::Defaulted;
        assert!(!loan.is_overdue(now + Duration::days(8)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LoanStatus::Active.is_terminal());
        assert!(LoanStatus::Repaid.is_terminal());
        assert!(LoanStatus::Defaulted.is_terminal());
    }
}
