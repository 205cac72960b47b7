//! Economy Engine
//!
//! Wires the ledger, reward engine, loan state machine and comment board
//! around one store, and exposes the operations the HTTP layer calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cascade::{Comment, CommentBoard, LikeOutcome};
use crate::config::{EconomyConfig, WalletConfig};
use crate::credit::CreditScore;
use crate::error::Result;
use crate::ledger::{Currency, EconomyStore, InMemoryLedger, Wallet};
use crate::loans::{Loan, LoanStateMachine};
use crate::notify::{LogNotifier, Notifier};
use crate::rewards::{BadgeCatalog, EventEnvelope, RewardEngine, RewardEvent, RewardOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardEventRequest {
    pub user_id: String,
    pub event_type: String,
    pub reference_id: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub user_id: String,
    pub points_balance: i64,
    pub coins_balance: i64,
    pub total_earned: i64,
    pub creator_level: u32,
    pub can_monetize: bool,
    /// Dollar value of the points balance, floored to the cent
    pub cash_value: f64,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditView {
    pub credit: CreditScore,
    pub active_loans: Vec<Loan>,
    /// Repaid and defaulted loans, oldest first
    pub history: Vec<Loan>,
}

/// Stored balances against the fold of the entry log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencyReconciliation {
    pub currency: Currency,
    pub stored_balance: i64,
    pub ledger_sum: i64,
}

impl CurrencyReconciliation {
    pub fn drift(&self) -> i64 {
        self.stored_balance - self.ledger_sum
    }
}

pub struct EconomyEngine {
    store: Arc<dyn EconomyStore>,
    rewards: Arc<RewardEngine>,
    loans: LoanStateMachine,
    comments: CommentBoard,
    wallet: WalletConfig,
}

impl EconomyEngine {
    pub fn new(store: Arc<dyn EconomyStore>, config: &EconomyConfig, notifier: Arc<dyn Notifier>) -> Self {
        let rewards = Arc::new(RewardEngine::new(
            store.clone(),
            config.rewards.clone(),
            BadgeCatalog::standard(),
            notifier.clone(),
            config.retry.clone(),
        ));
        let loans = LoanStateMachine::new(
            store.clone(),
            config.loans.clone(),
            config.credit.clone(),
            config.retry.clone(),
            notifier,
        );

        Self {
            store,
            comments: CommentBoard::new(rewards.clone()),
            rewards,
            loans,
            wallet: config.wallet.clone(),
        }
    }

    /// Engine over a fresh in-memory ledger, logging its notifications.
    pub fn in_memory(config: &EconomyConfig) -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), config, Arc::new(LogNotifier))
    }

    pub fn store(&self) -> &Arc<dyn EconomyStore> {
        &self.store
    }

    pub fn rewards(&self) -> &RewardEngine {
        &self.rewards
    }

    pub fn loans(&self) -> &LoanStateMachine {
        &self.loans
    }

    pub fn comments(&self) -> &CommentBoard {
        &self.comments
    }

    pub async fn record_event(&self, request: RewardEventRequest) -> Result<RewardOutcome> {
        let event = RewardEvent::parse(&request.event_type, &request.metadata)?;
        self.rewards
            .process(EventEnvelope::new(request.user_id, request.reference_id, event))
            .await
    }

    pub async fn request_loan(&self, user_id: &str, amount: i64, term_days: u32) -> Result<Loan> {
        self.loans.request_loan(user_id, amount, term_days).await
    }

    pub async fn repay_loan(&self, loan_id: Uuid, user_id: &str, amount: i64) -> Result<Loan> {
        self.loans.repay(loan_id, user_id, amount).await
    }

    pub async fn sweep_defaults(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        self.loans.sweep_defaults(now).await
    }

    pub async fn wallet_view(&self, user_id: &str) -> Result<WalletView> {
        let wallet = self
            .store
            .wallet(user_id)
            .await?
            .unwrap_or_else(|| Wallet::new(user_id.to_string()));

        let cents = wallet.points_balance.saturating_mul(100) / self.wallet.points_per_dollar;
        Ok(WalletView {
            user_id: wallet.user_id,
            points_balance: wallet.points_balance,
            coins_balance: wallet.coins_balance,
            total_earned: wallet.total_earned,
            creator_level: wallet.creator_level,
            can_monetize: wallet.can_monetize,
            cash_value: cents as f64 / 100.0,
            archived: wallet.archived,
        })
    }

    pub async fn credit_view(&self, user_id: &str) -> Result<CreditView> {
        let credit = self.loans.credit_score(user_id).await?;
        let (active_loans, history) = self
            .loans
            .loans(user_id)
            .await?
            .into_iter()
            .partition(Loan::is_active);

        Ok(CreditView {
            credit,
            active_loans,
            history,
        })
    }

    pub async fn add_comment(&self, post_id: &str, comment_id: &str, author_id: &str) -> Result<Comment> {
        self.comments
            .add_comment(post_id, comment_id, author_id, Utc::now())
            .await
    }

    pub async fn like_comment(&self, post_id: &str, comment_id: &str, liker_id: &str) -> Result<LikeOutcome> {
        self.comments.like_comment(post_id, comment_id, liker_id).await
    }

    pub async fn archive_wallet(&self, user_id: &str) -> Result<()> {
        self.store.archive_wallet(user_id).await
    }

    /// Folds the entry log for each currency and compares it with the stored
    /// balance. Any drift is logged.
    pub async fn reconcile(&self, user_id: &str) -> Result<Vec<CurrencyReconciliation>> {
        let mut report = Vec::with_capacity(Currency::ALL.len());
        for currency in Currency::ALL {
            let stored_balance = self.store.balance(user_id, currency).await?;
            let ledger_sum: i64 = self
                .store
                .entries(user_id, currency)
                .await?
                .iter()
                .map(|entry| entry.amount)
                .sum();

            let line = CurrencyReconciliation {
                currency,
                stored_balance,
                ledger_sum,
            };
            if line.drift() != 0 {
                warn!(
                    user_id = %user_id,
                    currency = %currency,
                    stored = stored_balance,
                    ledger = ledger_sum,
                    "Balance drift detected"
                );
            }
            report.push(line);
        }

        info!(user_id = %user_id, "Reconciliation complete");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(user: &str, event_type: &str, reference: &str, metadata: Value) -> RewardEventRequest {
        RewardEventRequest {
            user_id: user.to_string(),
            event_type: event_type.to_string(),
            reference_id: reference.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_wallet_view_cash_value() {
        let engine = EconomyEngine::in_memory(&EconomyConfig::default());
        engine
            .record_event(request("user_1", "challenge", "c1", json!({ "rewardPoints": 1234 })))
            .await
            .unwrap();

        let view = engine.wallet_view("user_1").await.unwrap();
        assert_eq!(view.points_balance, 1234);
        assert_eq!(view.total_earned, 1234);
        assert_eq!(view.creator_level, 3);
        assert_eq!(view.cash_value, 1.23);
    }

    #[tokio::test]
    async fn test_unknown_wallet_reads_as_empty() {
        let engine = EconomyEngine::in_memory(&EconomyConfig::default());
        let view = engine.wallet_view("nobody").await.unwrap();

        assert_eq!(view.points_balance, 0);
        assert_eq!(view.creator_level, 1);
        assert_eq!(view.cash_value, 0.0);
    }

    #[tokio::test]
    async fn test_unknown_event_type_rejected() {
        let engine = EconomyEngine::in_memory(&EconomyConfig::default());
        let err = engine
            .record_event(request("user_1", "levitate", "x1", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UnknownEventType");
    }

    #[tokio::test]
    async fn test_credit_view_splits_history() {
        let engine = EconomyEngine::in_memory(&EconomyConfig::default());
        let loan = engine.request_loan("user_1", 100, 7).await.unwrap();
        engine
            .record_event(request("user_1", "referral", "r1", json!({ "refereeId": "user_2" })))
            .await
            .unwrap();
        engine.repay_loan(loan.id, "user_1", 115).await.unwrap();
        let second = engine.request_loan("user_1", 50, 14).await.unwrap();

        let view = engine.credit_view("user_1").await.unwrap();
        assert_eq!(view.active_loans.len(), 1);
        assert_eq!(view.active_loans[0].id, second.id);
        assert_eq!(view.history.len(), 1);
        assert_eq!(view.credit.total_loans_completed, 1);
    }

    #[tokio::test]
    async fn test_reconcile_after_activity() {
        let engine = EconomyEngine::in_memory(&EconomyConfig::default());
        engine
            .record_event(request("user_1", "post", "p1", Value::Null))
            .await
            .unwrap();
        engine.request_loan("user_1", 100, 7).await.unwrap();

        let report = engine.reconcile("user_1").await.unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|line| line.drift() == 0));
    }
}
