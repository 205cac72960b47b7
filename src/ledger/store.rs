//! Ledger Store
//!
//! The only writer of balances. `LedgerStore` covers wallet postings;
//! `LoanStore` covers the loan and credit projections that the loan state
//! machine keeps next to them. `InMemoryLedger` implements both; the Postgres
//! implementation lives in `crate::database`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{Currency, IdempotencyKey, LedgerEntry, LedgerReason, Posting, PostingReceipt, Wallet};
use crate::credit::CreditScore;
use crate::error::{EconomyError, Result};
use crate::loans::Loan;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomically applies every leg of `posting` and appends its entries.
    ///
    /// Fails with `InsufficientFunds` if any leg would take a balance below
    /// zero, and with `DuplicateApplication` (carrying the original receipt)
    /// if the posting's idempotency key was already applied.
    async fn apply(&self, posting: Posting) -> Result<PostingReceipt>;

    /// Same as `apply`, and persists `loan` in the same unit of work. Nothing
    /// is written if the posting fails.
    async fn apply_with_loan(&self, posting: Posting, loan: &Loan) -> Result<PostingReceipt>;

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<i64>;

    async fn wallet(&self, user_id: &str) -> Result<Option<Wallet>>;

    /// Entries for one user and currency, oldest first.
    async fn entries(&self, user_id: &str, currency: Currency) -> Result<Vec<LedgerEntry>>;

    /// Receipt of the committed posting under `key`, if any.
    async fn receipt(&self, key: &IdempotencyKey) -> Result<Option<PostingReceipt>>;

    /// Soft-archives the wallet; later postings fail with `WalletArchived`.
    async fn archive_wallet(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn loan(&self, loan_id: Uuid) -> Result<Option<Loan>>;

    /// All loans of a user, oldest first.
    async fn loans_for_user(&self, user_id: &str) -> Result<Vec<Loan>>;

    async fn save_loan(&self, loan: &Loan) -> Result<()>;

    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>>;

    async fn credit_score(&self, user_id: &str) -> Result<Option<CreditScore>>;

    async fn save_credit_score(&self, score: &CreditScore) -> Result<()>;
}

/// Everything the engine persists.
pub trait EconomyStore: LedgerStore + LoanStore {}

impl<T: LedgerStore + LoanStore> EconomyStore for T {}

pub(crate) fn validate_posting(posting: &Posting) -> Result<()> {
    if posting.user_id.is_empty() {
        return Err(EconomyError::InvalidEvent("posting has no user".to_string()));
    }
    if posting.reference_id.is_empty() {
        return Err(EconomyError::InvalidEvent(format!(
            "{} posting has no reference id",
            posting.reason
        )));
    }
    if posting.legs.is_empty() {
        return Err(EconomyError::InvalidAmount(0));
    }
    if let Some(leg) = posting.legs.iter().find(|leg| leg.amount == 0) {
        return Err(EconomyError::InvalidAmount(leg.amount));
    }
    Ok(())
}

/// The wallet that results from applying `posting` to `wallet`, or the reason
/// it cannot be applied. Legs are checked together so a failing leg leaves
/// every balance untouched.
pub(crate) fn project_wallet(
    wallet: &Wallet,
    posting: &Posting,
    now: DateTime<Utc>,
) -> Result<Wallet> {
    if wallet.archived {
        return Err(EconomyError::WalletArchived(wallet.user_id.clone()));
    }

    let mut next = wallet.clone();
    for leg in &posting.legs {
        let balance = next.balance_mut(leg.currency);
        let updated = balance
            .checked_add(leg.amount)
            .ok_or(EconomyError::InvalidAmount(leg.amount))?;
        if updated < 0 {
            return Err(EconomyError::InsufficientFunds {
                currency: leg.currency,
                available: *balance,
                requested: -leg.amount,
            });
        }
        *balance = updated;

        if leg.currency == Currency::Points && leg.amount > 0 && posting.reason.is_earning() {
            next.total_earned += leg.amount;
        }
    }

    if posting.reason == LedgerReason::TopComment && posting.legs.iter().any(|leg| leg.amount > 0) {
        next.top_comments += 1;
    }

    next.refresh_level();
    next.version += 1;
    next.updated_at = now;
    Ok(next)
}

#[derive(Debug, Default)]
struct UserBook {
    /// `None` until the first committed posting
    wallet: Option<Wallet>,
    entries: Vec<LedgerEntry>,
    receipts: HashMap<(LedgerReason, String), PostingReceipt>,
}

/// Process-local ledger. Each user's book sits behind its own mutex, so
/// postings for one user serialize while different users proceed in parallel.
/// Books are never evicted; memory grows with the number of users.
#[derive(Default)]
pub struct InMemoryLedger {
    books: DashMap<String, Arc<Mutex<UserBook>>>,
    loans: DashMap<Uuid, Loan>,
    credit: DashMap<String, CreditScore>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        info!("Initializing in-memory ledger");
        Self::default()
    }

    fn book(&self, user_id: &str) -> Arc<Mutex<UserBook>> {
        self.books
            .entry(user_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn existing_book(&self, user_id: &str) -> Option<Arc<Mutex<UserBook>>> {
        self.books.get(user_id).map(|book| book.value().clone())
    }

    async fn commit(&self, posting: Posting, loan: Option<&Loan>) -> Result<PostingReceipt> {
        validate_posting(&posting)?;

        let handle = self.book(&posting.user_id);
        let mut book = handle.lock().await;

        let receipt_key = (posting.reason, posting.reference_id.clone());
        if let Some(prior) = book.receipts.get(&receipt_key) {
            return Err(EconomyError::DuplicateApplication(Box::new(prior.clone())));
        }

        let now = Utc::now();
        let current = book
            .wallet
            .clone()
            .unwrap_or_else(|| Wallet::new(posting.user_id.clone()));
        let next = project_wallet(&current, &posting, now)?;

        let entries: Vec<LedgerEntry> = posting
            .legs
            .iter()
            .map(|leg| LedgerEntry::from_leg(&posting, leg, now))
            .collect();

        let receipt = PostingReceipt {
            key: posting.key(),
            entries: entries.clone(),
            points_balance: next.points_balance,
            coins_balance: next.coins_balance,
            fingerprint: posting.fingerprint.clone(),
            committed_at: now,
        };

        book.entries.extend(entries);
        book.wallet = Some(next);
        book.receipts.insert(receipt_key, receipt.clone());

        if let Some(loan) = loan {
            self.loans.insert(loan.id, loan.clone());
        }

        debug!(
            key = %receipt.key,
            points = receipt.points_balance,
            coins = receipt.coins_balance,
            "Posting applied"
        );
        Ok(receipt)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn apply(&self, posting: Posting) -> Result<PostingReceipt> {
        self.commit(posting, None).await
    }

    async fn apply_with_loan(&self, posting: Posting, loan: &Loan) -> Result<PostingReceipt> {
        self.commit(posting, Some(loan)).await
    }

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<i64> {
        Ok(self
            .wallet(user_id)
            .await?
            .map(|wallet| wallet.balance(currency))
            .unwrap_or(0))
    }

    async fn wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        match self.existing_book(user_id) {
            Some(handle) => Ok(handle.lock().await.wallet.clone()),
            None => Ok(None),
        }
    }

    async fn entries(&self, user_id: &str, currency: Currency) -> Result<Vec<LedgerEntry>> {
        match self.existing_book(user_id) {
            Some(handle) => Ok(handle
                .lock()
                .await
                .entries
                .iter()
                .filter(|entry| entry.currency == currency)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn receipt(&self, key: &IdempotencyKey) -> Result<Option<PostingReceipt>> {
        let Some(handle) = self.existing_book(&key.user_id) else {
            return Ok(None);
        };
        let book = handle.lock().await;
        Ok(book
            .receipts
            .get(&(key.reason, key.reference_id.clone()))
            .cloned())
    }

    async fn archive_wallet(&self, user_id: &str) -> Result<()> {
        let handle = self.book(user_id);
        let mut book = handle.lock().await;

        let wallet = book
            .wallet
            .get_or_insert_with(|| Wallet::new(user_id.to_string()));
        wallet.archived = true;
        wallet.version += 1;
        wallet.updated_at = Utc::now();

        info!(user_id = %user_id, "Wallet archived");
        Ok(())
    }
}

#[async_trait]
impl LoanStore for InMemoryLedger {
    async fn loan(&self, loan_id: Uuid) -> Result<Option<Loan>> {
        Ok(self.loans.get(&loan_id).map(|loan| loan.value().clone()))
    }

    async fn loans_for_user(&self, user_id: &str) -> Result<Vec<Loan>> {
        let mut loans: Vec<Loan> = self
            .loans
            .iter()
            .filter(|loan| loan.user_id == user_id)
            .map(|loan| loan.value().clone())
            .collect();
        loans.sort_by_key(|loan| loan.created_at);
        Ok(loans)
    }

    async fn save_loan(&self, loan: &Loan) -> Result<()> {
        self.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        Ok(self
            .loans
            .iter()
            .filter(|loan| loan.is_overdue(now))
            .map(|loan| loan.value().clone())
            .collect())
    }

    async fn credit_score(&self, user_id: &str) -> Result<Option<CreditScore>> {
        Ok(self.credit.get(user_id).map(|score| score.value().clone()))
    }

    async fn save_credit_score(&self, score: &CreditScore) -> Result<()> {
        self.credit.insert(score.user_id.clone(), score.clone());
        Ok(())
    }
}
