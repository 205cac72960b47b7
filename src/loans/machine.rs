//! Loan State Machine
//!
//! Every transition for a user runs under that user's lock, so requests,
//! repayments and the default sweep never interleave for the same borrower.
//! Money only moves through ledger postings; the loan record is persisted in
//! the same unit of work as the posting that moves it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::loan::{Loan, LoanStatus};
use crate::credit::{CreditPolicy, CreditScore};
use crate::error::{EconomyError, Result};
use crate::ledger::{apply_with_loan_retry, Currency, EconomyStore, LedgerReason, Posting, RetryPolicy};
use crate::locks::KeyedLocks;
use crate::notify::{emit, Notification, NotificationKind, Notifier};

/// Lending rules (governance-configurable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanPolicy {
    /// Terms a borrower may choose, in days
    pub allowed_terms: Vec<u32>,

    /// Whether a user may hold more than one active loan
    pub allow_stacking: bool,

    /// Seize available coins toward the outstanding amount on default
    pub recover_on_default: bool,

    /// How often the background sweep looks for overdue loans
    pub sweep_interval_secs: u64,
}

impl Default for LoanPolicy {
    fn default() -> Self {
        Self {
            allowed_terms: vec![7, 14, 30],
            allow_stacking: false,
            recover_on_default: true,
            sweep_interval_secs: 300,
        }
    }
}

pub struct LoanStateMachine {
    store: Arc<dyn EconomyStore>,
    policy: LoanPolicy,
    credit_policy: CreditPolicy,
    locks: KeyedLocks,
    retry: RetryPolicy,
    notifier: Arc<dyn Notifier>,
}

impl LoanStateMachine {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        policy: LoanPolicy,
        credit_policy: CreditPolicy,
        retry: RetryPolicy,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            policy,
            credit_policy,
            locks: KeyedLocks::new(),
            retry,
            notifier,
        }
    }

    pub fn policy(&self) -> &LoanPolicy {
        &self.policy
    }

    /// Stored credit record, or the record of a user with no history.
    pub async fn credit_score(&self, user_id: &str) -> Result<CreditScore> {
        Ok(self
            .store
            .credit_score(user_id)
            .await?
            .unwrap_or_else(|| CreditScore::new(user_id.to_string(), &self.credit_policy)))
    }

    pub async fn loans(&self, user_id: &str) -> Result<Vec<Loan>> {
        self.store.loans_for_user(user_id).await
    }

    pub async fn request_loan(&self, user_id: &str, principal: i64, term_days: u32) -> Result<Loan> {
        self.request_loan_at(user_id, principal, term_days, Utc::now()).await
    }

    /// Issues a loan and disburses `principal` coins.
    ///
    /// Fails without writing anything if the term is not offered, the user
    /// already holds an active loan (unless stacking is allowed), or the
    /// principal plus outstanding debt exceeds the credit limit.
    pub async fn request_loan_at(
        &self,
        user_id: &str,
        principal: i64,
        term_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        if user_id.is_empty() {
            return Err(EconomyError::InvalidEvent("userId is required".to_string()));
        }
        if principal <= 0 {
            return Err(EconomyError::InvalidAmount(principal));
        }
        if !self.policy.allowed_terms.contains(&term_days) {
            return Err(EconomyError::InvalidTerm(term_days));
        }

        let _guard = self.locks.lock(user_id).await;

        let active: Vec<Loan> = self
            .store
            .loans_for_user(user_id)
            .await?
            .into_iter()
            .filter(Loan::is_active)
            .collect();
        if let Some(existing) = active.first() {
            if !self.policy.allow_stacking {
                return Err(EconomyError::LoanAlreadyActive { loan_id: existing.id });
            }
        }

        let credit = self.credit_score(user_id).await?;
        let outstanding: i64 = active.iter().map(Loan::outstanding).sum();
        let available = (credit.credit_limit - outstanding).max(0);
        if principal > available {
            return Err(EconomyError::CreditLimitExceeded {
                available,
                requested: principal,
            });
        }

        let loan = Loan::new(
            user_id.to_string(),
            principal,
            term_days,
            credit.interest_rate_pct,
            now,
        );
        let posting = Posting::single(
            user_id,
            Currency::Coins,
            principal,
            LedgerReason::LoanDisbursement,
            loan.id.to_string(),
        );
        apply_with_loan_retry(&self.store, &self.retry, posting, &loan).await?;

        info!(
            loan_id = %loan.id,
            user_id = %user_id,
            principal = principal,
            total_due = loan.total_due,
            tier = credit.tier.as_str(),
            "Loan disbursed"
        );
        emit(
            self.notifier.as_ref(),
            Notification::new(
                user_id,
                NotificationKind::LoanDisbursed,
                "Loan approved",
                format!(
                    "{} coins disbursed; {} coins due by {}",
                    principal,
                    loan.total_due,
                    loan.due_date.format("%Y-%m-%d")
                ),
                loan.id.to_string(),
            ),
        );
        Ok(loan)
    }

    pub async fn repay(&self, loan_id: Uuid, user_id: &str, amount: i64) -> Result<Loan> {
        self.repay_at(loan_id, user_id, amount, Utc::now()).await
    }

    /// Applies a repayment. Amounts above the outstanding balance are clamped
    /// so `amount_repaid` never exceeds `total_due`.
    pub async fn repay_at(
        &self,
        loan_id: Uuid,
        user_id: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<Loan> {
        if amount <= 0 {
            return Err(EconomyError::InvalidAmount(amount));
        }

        let _guard = self.locks.lock(user_id).await;

        let loan = self
            .store
            .loan(loan_id)
            .await?
            .filter(|loan| loan.user_id == user_id)
            .ok_or(EconomyError::LoanNotFound(loan_id))?;
        if !loan.is_active() {
            return Err(EconomyError::LoanNotActive {
                loan_id,
                status: loan.status,
            });
        }

        let charge = amount.min(loan.outstanding());
        let reference = loan.next_payment_reference();

        let mut updated = loan;
        updated.amount_repaid += charge;
        updated.payments_made += 1;
        let completed = updated.amount_repaid >= updated.total_due;
        if completed {
            updated.status = LoanStatus::Repaid;
            updated.resolved_at = Some(now);
        }

        let posting = Posting::single(
            user_id,
            Currency::Coins,
            -charge,
            LedgerReason::LoanRepayment,
            reference,
        );
        match apply_with_loan_retry(&self.store, &self.retry, posting, &updated).await {
            Ok(_) => {}
            // The payment number comes from the loan read under the lock, so a
            // collision means another writer moved the loan.
            Err(EconomyError::DuplicateApplication(prior)) => {
                return Err(EconomyError::ConcurrentModification(prior.key.to_string()));
            }
            Err(e) => return Err(e),
        }

        info!(
            loan_id = %loan_id,
            user_id = %user_id,
            charged = charge,
            amount_repaid = updated.amount_repaid,
            total_due = updated.total_due,
            "Loan repayment applied"
        );

        if completed {
            let on_time = now <= updated.due_date;
            let credit = self
                .resolve_credit(user_id, |score, policy| score.record_repaid(on_time, policy))
                .await;
            info!(
                loan_id = %loan_id,
                user_id = %user_id,
                on_time = on_time,
                score = ?credit.as_ref().map(|c| c.score),
                "Loan repaid"
            );
            emit(
                self.notifier.as_ref(),
                Notification::new(
                    user_id,
                    NotificationKind::LoanRepaid,
                    "Loan repaid",
                    format!("Loan of {} coins is fully repaid", updated.principal),
                    loan_id.to_string(),
                ),
            );
        }

        Ok(updated)
    }

    /// Marks every loan past its due date as defaulted. Safe to run
    /// concurrently with itself: the status is re-checked under the user lock.
    pub async fn sweep_defaults(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        let candidates = self.store.overdue_loans(now).await?;
        let mut defaulted = Vec::new();

        for candidate in candidates {
            let _guard = self.locks.lock(&candidate.user_id).await;

            let loan = match self.store.loan(candidate.id).await? {
                Some(loan) if loan.is_overdue(now) => loan,
                _ => continue,
            };

            match self.default_loan(loan, now).await {
                Ok(loan) => defaulted.push(loan),
                Err(e) => {
                    error!(loan_id = %candidate.id, error = %e, "Failed to default loan");
                }
            }
        }

        if !defaulted.is_empty() {
            info!(count = defaulted.len(), "Default sweep complete");
        }
        Ok(defaulted)
    }

    async fn default_loan(&self, loan: Loan, now: DateTime<Utc>) -> Result<Loan> {
        let mut updated = loan;
        updated.status = LoanStatus::Defaulted;
        updated.resolved_at = Some(now);

        let recovery = if self.policy.recover_on_default {
            let coins = self.store.balance(&updated.user_id, Currency::Coins).await?;
            coins.min(updated.outstanding())
        } else {
            0
        };

        let recovered = if recovery > 0 {
            let mut with_recovery = updated.clone();
            with_recovery.recovered_on_default = recovery;
            let posting = Posting::single(
                updated.user_id.clone(),
                Currency::Coins,
                -recovery,
                LedgerReason::LoanPenalty,
                format!("{}:default", updated.id),
            );
            match apply_with_loan_retry(&self.store, &self.retry, posting, &with_recovery).await {
                Ok(_) => {
                    updated = with_recovery;
                    true
                }
                Err(e @ EconomyError::InsufficientFunds { .. }) => {
                    warn!(loan_id = %updated.id, error = %e, "Recovery skipped, balance moved");
                    false
                }
                Err(e) => return Err(e),
            }
        } else {
            false
        };
        if !recovered {
            self.store.save_loan(&updated).await?;
        }

        let credit = self
            .resolve_credit(&updated.user_id, |score, policy| score.record_default(policy))
            .await;
        warn!(
            loan_id = %updated.id,
            user_id = %updated.user_id,
            outstanding = updated.outstanding(),
            recovered = updated.recovered_on_default,
            score = ?credit.as_ref().map(|c| c.score),
            "Loan defaulted"
        );
        emit(
            self.notifier.as_ref(),
            Notification::new(
                updated.user_id.clone(),
                NotificationKind::LoanDefaulted,
                "Loan defaulted",
                format!(
                    "Loan of {} coins passed its due date with {} coins unpaid",
                    updated.principal,
                    updated.outstanding()
                ),
                updated.id.to_string(),
            ),
        );
        Ok(updated)
    }

    /// Records a loan resolution on the user's credit. The loan is already
    /// committed at this point, so a storage failure is logged, not returned.
    async fn resolve_credit<F>(&self, user_id: &str, record: F) -> Option<CreditScore>
    where
        F: FnOnce(&mut CreditScore, &CreditPolicy),
    {
        let result = async {
            let mut score = self.credit_score(user_id).await?;
            record(&mut score, &self.credit_policy);
            self.store.save_credit_score(&score).await?;
            Ok::<_, EconomyError>(score)
        }
        .await;

        match result {
            Ok(score) => Some(score),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Credit recompute failed");
                None
            }
        }
    }
}
