//! Reward Engine
//!
//! Turns events into postings through the rule table, applies them through
//! the ledger store, then runs the follow-up cascade: badge checks for every
//! credited user and notifications. Replayed deliveries are swallowed and
//! report the state left by the original delivery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::badges::{BadgeCatalog, BadgeDefinition, BadgeProgress};
use super::rules::{CurrencyDelta, EventEnvelope, RewardEvent, RewardRules};
use crate::error::{EconomyError, Result};
use crate::ledger::{
    apply_with_retry, reversal_reference, Currency, EconomyStore, IdempotencyKey, LedgerReason,
    Posting, PostingReceipt, RetryPolicy,
};
use crate::notify::{emit, Notification, NotificationKind, Notifier};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub points_balance: i64,
    pub coins_balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardOutcome {
    pub user_id: String,
    pub event_type: String,
    pub reference_id: String,
    /// Deltas the event committed for `user_id`
    pub points_delta: i64,
    pub coins_delta: i64,
    /// Balances right after the event's own posting
    pub new_balances: Balances,
    /// True when every posting of the event had already been applied
    pub replayed: bool,
    pub badges_awarded: Vec<String>,
}

pub struct RewardEngine {
    store: Arc<dyn EconomyStore>,
    rules: RewardRules,
    badges: BadgeCatalog,
    notifier: Arc<dyn Notifier>,
    retry: RetryPolicy,
}

impl RewardEngine {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        rules: RewardRules,
        badges: BadgeCatalog,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            rules,
            badges,
            notifier,
            retry,
        }
    }

    pub fn rules(&self) -> &RewardRules {
        &self.rules
    }

    pub fn badges(&self) -> &BadgeCatalog {
        &self.badges
    }

    /// Evaluates and applies one event.
    ///
    /// Postings are applied in rule order. If one fails, the postings this
    /// delivery already committed are reversed so the event nets to zero, and
    /// the reference is retired. A replay returns the balances and deltas
    /// recorded by the first delivery.
    pub async fn process(&self, envelope: EventEnvelope) -> Result<RewardOutcome> {
        let deltas = self.rules.evaluate(&envelope)?;
        let fingerprint = envelope.event.fingerprint();
        let postings: Vec<Posting> = group_postings(&deltas, &envelope.reference_id)
            .into_iter()
            .map(|posting| posting.with_fingerprint(fingerprint.clone()))
            .collect();

        self.ensure_not_reversed(&postings).await?;
        self.ensure_counterparties_open(&envelope, &postings).await?;

        let mut settled: Vec<(PostingReceipt, bool)> = Vec::with_capacity(postings.len());
        for posting in postings {
            match self.apply(posting).await {
                Ok((receipt, replayed)) => {
                    if replayed {
                        debug!(key = %receipt.key, "Duplicate delivery swallowed");
                    }
                    settled.push((receipt, replayed));
                }
                Err(e) => {
                    self.compensate(&settled).await;
                    return Err(e);
                }
            }
        }
        let replayed = settled.iter().all(|(_, replayed)| *replayed);

        let streak_days = match envelope.event {
            RewardEvent::StreakBonus { days } => Some(days),
            _ => None,
        };

        let mut badges_awarded = Vec::new();
        for (receipt, _) in settled.iter().filter(|(_, replayed)| !replayed) {
            self.announce(&envelope, receipt);

            let credited = receipt.entries.iter().any(|entry| entry.amount > 0);
            if credited {
                let user_id = receipt.key.user_id.as_str();
                let streak = if user_id == envelope.user_id { streak_days } else { None };
                let awarded = self.check_badges(user_id, streak).await;
                if user_id == envelope.user_id {
                    badges_awarded.extend(awarded);
                }
            }
        }

        let own: Vec<&PostingReceipt> = settled
            .iter()
            .map(|(receipt, _)| receipt)
            .filter(|receipt| receipt.key.user_id == envelope.user_id)
            .collect();
        let new_balances = match own.last() {
            Some(receipt) => Balances {
                points_balance: receipt.points_balance,
                coins_balance: receipt.coins_balance,
            },
            None => self.balances(&envelope.user_id).await?,
        };
        let outcome = RewardOutcome {
            user_id: envelope.user_id.clone(),
            event_type: envelope.event.event_type().to_string(),
            reference_id: envelope.reference_id.clone(),
            points_delta: own.iter().map(|receipt| receipt.delta(Currency::Points)).sum(),
            coins_delta: own.iter().map(|receipt| receipt.delta(Currency::Coins)).sum(),
            new_balances,
            replayed,
            badges_awarded,
        };

        info!(
            user_id = %outcome.user_id,
            event_type = %outcome.event_type,
            reference_id = %outcome.reference_id,
            points_delta = outcome.points_delta,
            coins_delta = outcome.coins_delta,
            replayed = outcome.replayed,
            "Reward event processed"
        );
        Ok(outcome)
    }

    /// A reference whose delivery was reversed stays retired.
    async fn ensure_not_reversed(&self, postings: &[Posting]) -> Result<()> {
        for posting in postings {
            let key = IdempotencyKey {
                reason: posting.reason,
                reference_id: reversal_reference(&posting.reference_id),
                user_id: posting.user_id.clone(),
            };
            if self.store.receipt(&key).await?.is_some() {
                return Err(EconomyError::InvalidEvent(format!(
                    "reference {} was reversed after a failed delivery",
                    posting.reference_id
                )));
            }
        }
        Ok(())
    }

    /// Rejects the event up front when a counterparty's wallet is archived
    /// and its posting has not been applied yet.
    async fn ensure_counterparties_open(&self, envelope: &EventEnvelope, postings: &[Posting]) -> Result<()> {
        for posting in postings.iter().filter(|posting| posting.user_id != envelope.user_id) {
            if self.store.receipt(&posting.key()).await?.is_some() {
                continue;
            }
            let archived = self
                .store
                .wallet(&posting.user_id)
                .await?
                .is_some_and(|wallet| wallet.archived);
            if archived {
                return Err(EconomyError::WalletArchived(posting.user_id.clone()));
            }
        }
        Ok(())
    }

    /// Reverses the postings this delivery committed, newest first.
    async fn compensate(&self, settled: &[(PostingReceipt, bool)]) {
        for (receipt, _) in settled.iter().rev().filter(|(_, replayed)| !replayed) {
            match apply_with_retry(&self.store, &self.retry, receipt.reversal()).await {
                Ok(_) | Err(EconomyError::DuplicateApplication(_)) => {
                    warn!(key = %receipt.key, "Posting reversed after failed delivery");
                }
                Err(e) => {
                    error!(key = %receipt.key, error = %e, "Reversal failed; reconcile this wallet");
                }
            }
        }
    }

    pub async fn balances(&self, user_id: &str) -> Result<Balances> {
        Ok(self
            .store
            .wallet(user_id)
            .await?
            .map(|wallet| Balances {
                points_balance: wallet.points_balance,
                coins_balance: wallet.coins_balance,
            })
            .unwrap_or_default())
    }

    /// Applies a posting; a duplicate yields the original receipt and `true`.
    /// A duplicate whose payload differs from the original is rejected.
    async fn apply(&self, posting: Posting) -> Result<(PostingReceipt, bool)> {
        let fingerprint = posting.fingerprint.clone();
        match apply_with_retry(&self.store, &self.retry, posting).await {
            Ok(receipt) => Ok((receipt, false)),
            Err(EconomyError::DuplicateApplication(prior)) if prior.fingerprint != fingerprint => {
                Err(EconomyError::InvalidEvent(format!(
                    "reference {} was already used with a different payload",
                    prior.key.reference_id
                )))
            }
            Err(EconomyError::DuplicateApplication(prior)) => Ok((*prior, true)),
            Err(e) => Err(e),
        }
    }

    /// Awards every badge the user now qualifies for. Runs after the event's
    /// postings are committed, so failures are logged rather than returned.
    async fn check_badges(&self, user_id: &str, streak_days: Option<u32>) -> Vec<String> {
        if self.badges.is_empty() {
            return Vec::new();
        }

        let wallet = match self.store.wallet(user_id).await {
            Ok(Some(wallet)) => wallet,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Badge check skipped");
                return Vec::new();
            }
        };

        let progress = BadgeProgress {
            total_earned: wallet.total_earned,
            streak_days,
            top_comments: wallet.top_comments,
        };
        let earned: Vec<BadgeDefinition> = self.badges.earned(&progress).cloned().collect();

        let mut awarded = Vec::new();
        for badge in earned {
            let posting = Posting::single(
                user_id,
                Currency::Coins,
                badge.coins,
                LedgerReason::Badge,
                badge.id.clone(),
            );
            match self.apply(posting).await {
                Ok((_, true)) => {}
                Ok((_, false)) => {
                    info!(user_id = %user_id, badge = %badge.id, "Badge awarded");
                    emit(
                        self.notifier.as_ref(),
                        Notification::new(
                            user_id,
                            NotificationKind::BadgeAwarded,
                            format!("New badge: {}", badge.name),
                            format!("You earned {} and +{} coins", badge.name, badge.coins),
                            badge.id.clone(),
                        ),
                    );
                    awarded.push(badge.id);
                }
                Err(e) => {
                    warn!(user_id = %user_id, badge = %badge.id, error = %e, "Badge award failed");
                }
            }
        }
        awarded
    }

    fn announce(&self, envelope: &EventEnvelope, receipt: &PostingReceipt) {
        let user_id = receipt.key.user_id.as_str();
        let summary = describe(receipt);

        let (kind, title, message) = match (&envelope.event, receipt.key.reason) {
            (_, LedgerReason::TipSent) => return,
            (_, LedgerReason::TipReceived) => (
                NotificationKind::TipReceived,
                "You received a tip".to_string(),
                format!("{} tipped you {}", envelope.user_id, summary),
            ),
            (RewardEvent::TopComment, _) => (
                NotificationKind::TopComment,
                "Your comment is the top comment".to_string(),
                format!("Your comment earned {summary}"),
            ),
            (RewardEvent::BadgeEarned { badge_id, .. }, _) => (
                NotificationKind::BadgeAwarded,
                format!("New badge: {badge_id}"),
                format!("You earned {summary}"),
            ),
            (RewardEvent::ReferralClaimed { .. }, _) if user_id != envelope.user_id => (
                NotificationKind::RewardEarned,
                "Welcome bonus".to_string(),
                format!("You joined through a referral and earned {summary}"),
            ),
            (event, _) => (
                NotificationKind::RewardEarned,
                "Reward earned".to_string(),
                format!("{} reward: {summary}", event.event_type()),
            ),
        };

        emit(
            self.notifier.as_ref(),
            Notification::new(user_id, kind, title, message, envelope.reference_id.clone()),
        );
    }
}

/// One posting per (user, reason), in first-seen order.
fn group_postings(deltas: &[CurrencyDelta], reference_id: &str) -> Vec<Posting> {
    let mut postings: Vec<Posting> = Vec::new();
    for delta in deltas {
        let existing = postings
            .iter_mut()
            .find(|posting| posting.user_id == delta.user_id && posting.reason == delta.reason);
        match existing {
            Some(posting) => posting.add_leg(delta.currency, delta.amount),
            None => postings.push(Posting::single(
                delta.user_id.clone(),
                delta.currency,
                delta.amount,
                delta.reason,
                reference_id,
            )),
        }
    }
    postings
}

fn describe(receipt: &PostingReceipt) -> String {
    Currency::ALL
        .iter()
        .map(|currency| (currency, receipt.delta(*currency)))
        .filter(|(_, amount)| *amount != 0)
        .map(|(currency, amount)| format!("{:+} {}", amount, currency))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credit::CreditScore;
    use crate::ledger::{InMemoryLedger, LedgerEntry, LedgerStore, LoanStore, Wallet};
    use crate::loans::Loan;
    use crate::notify::{ChannelNotifier, LogNotifier};
    use chrono::{DateTime, Utc};
    use uuid::Uuid;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn engine() -> (RewardEngine, Arc<InMemoryLedger>, UnboundedReceiver<Notification>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let (notifier, rx) = ChannelNotifier::channel();
        let engine = RewardEngine::new(
            ledger.clone(),
            RewardRules::default(),
            BadgeCatalog::standard(),
            Arc::new(notifier),
            RetryPolicy::default(),
        );
        (engine, ledger, rx)
    }

    #[tokio::test]
    async fn test_post_reward_and_replay() {
        let (engine, _ledger, mut rx) = engine();
        let event = EventEnvelope::new("user_1", "post_1", RewardEvent::PostCreated);

        let first = engine.process(event.clone()).await.unwrap();
        assert_eq!(first.points_delta, 5);
        assert_eq!(first.new_balances.points_balance, 5);
        assert!(!first.replayed);

        let second = engine.process(event).await.unwrap();
        assert!(second.replayed);
        assert_eq!(second.new_balances, first.new_balances);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "replay must not notify again");
    }

    #[tokio::test]
    async fn test_tip_without_funds_credits_nobody() {
        let (engine, ledger, _rx) = engine();
        let tip = EventEnvelope::new(
            "user_1",
            "tip_1",
            RewardEvent::TipSent {
                recipient_id: "user_2".to_string(),
                amount: 10,
            },
        );

        let err = engine.process(tip).await.unwrap_err();
        assert_eq!(err.code(), "InsufficientFunds");
        assert!(ledger.wallet("user_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tip_moves_coins() {
        let (engine, ledger, mut rx) = engine();
        engine
            .process(EventEnvelope::new(
                "user_1",
                "ref_1",
                RewardEvent::ReferralClaimed {
                    referee_id: "user_3".to_string(),
                },
            ))
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}

        let outcome = engine
            .process(EventEnvelope::new(
                "user_1",
                "tip_1",
                RewardEvent::TipSent {
                    recipient_id: "user_2".to_string(),
                    amount: 20,
                },
            ))
            .await
            .unwrap();

        assert_eq!(outcome.coins_delta, -20);
        assert_eq!(outcome.new_balances.coins_balance, 30);
        assert_eq!(ledger.balance("user_2", Currency::Coins).await.unwrap(), 20);

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.user_id, "user_2");
        assert_eq!(notification.kind, NotificationKind::TipReceived);
    }

    #[tokio::test]
    async fn test_streak_awards_badge_once() {
        let (engine, ledger, _rx) = engine();

        let first = engine
            .process(EventEnvelope::new("user_1", "streak_day_7", RewardEvent::StreakBonus { days: 7 }))
            .await
            .unwrap();
        assert_eq!(first.points_delta, 21);
        assert_eq!(first.badges_awarded, vec!["week_warrior".to_string()]);

        let second = engine
            .process(EventEnvelope::new("user_1", "streak_day_8", RewardEvent::StreakBonus { days: 8 }))
            .await
            .unwrap();
        assert!(second.badges_awarded.is_empty());
        assert_eq!(ledger.balance("user_1", Currency::Coins).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_referral_credits_referee() {
        let (engine, ledger, _rx) = engine();
        let outcome = engine
            .process(EventEnvelope::new(
                "user_1",
                "invite_1",
                RewardEvent::ReferralClaimed {
                    referee_id: "user_2".to_string(),
                },
            ))
            .await
            .unwrap();

        assert_eq!(outcome.coins_delta, 50);
        assert_eq!(ledger.balance("user_2", Currency::Coins).await.unwrap(), 25);
    }

    fn tip(sender: &str, reference: &str, recipient: &str, amount: i64) -> EventEnvelope {
        EventEnvelope::new(
            sender,
            reference,
            RewardEvent::TipSent {
                recipient_id: recipient.to_string(),
                amount,
            },
        )
    }

    fn referral(user: &str, reference: &str, referee: &str) -> EventEnvelope {
        EventEnvelope::new(
            user,
            reference,
            RewardEvent::ReferralClaimed {
                referee_id: referee.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_tip_to_archived_wallet_moves_nothing() {
        let (engine, ledger, _rx) = engine();
        engine.process(referral("alice", "ref_1", "carol")).await.unwrap();
        ledger.archive_wallet("bob").await.unwrap();

        let err = engine.process(tip("alice", "t1", "bob", 20)).await.unwrap_err();
        assert_eq!(err.code(), "WalletArchived");
        assert_eq!(ledger.balance("alice", Currency::Coins).await.unwrap(), 50);
        assert_eq!(ledger.balance("bob", Currency::Coins).await.unwrap(), 0);
        assert_eq!(ledger.entries("alice", Currency::Coins).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_referral_to_archived_referee_moves_nothing() {
        let (engine, ledger, _rx) = engine();
        ledger.archive_wallet("bob").await.unwrap();

        let err = engine.process(referral("alice", "ref_1", "bob")).await.unwrap_err();
        assert_eq!(err.code(), "WalletArchived");
        assert!(ledger.wallet("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_with_other_recipient_is_rejected() {
        let (engine, ledger, _rx) = engine();
        engine.process(referral("alice", "ref_1", "carol")).await.unwrap();
        engine.process(tip("alice", "t1", "bob", 50)).await.unwrap();

        for recipient in ["dave", "erin"] {
            let err = engine.process(tip("alice", "t1", recipient, 50)).await.unwrap_err();
            assert_eq!(err.code(), "InvalidEvent");
            assert!(ledger.wallet(recipient).await.unwrap().is_none());
        }

        let err = engine.process(referral("alice", "ref_1", "dave")).await.unwrap_err();
        assert_eq!(err.code(), "InvalidEvent");

        let same = engine.process(tip("alice", "t1", "bob", 50)).await.unwrap();
        assert!(same.replayed);
        assert_eq!(ledger.balance("alice", Currency::Coins).await.unwrap(), 0);
        assert_eq!(ledger.balance("bob", Currency::Coins).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_replay_reports_first_delivery() {
        let (engine, _ledger, _rx) = engine();
        let challenge = |points| {
            EventEnvelope::new(
                "user_1",
                "c1",
                RewardEvent::ChallengeCompleted {
                    reward_points: Some(points),
                },
            )
        };

        let first = engine.process(challenge(20)).await.unwrap();
        engine
            .process(EventEnvelope::new("user_1", "post_1", RewardEvent::PostCreated))
            .await
            .unwrap();

        let replay = engine.process(challenge(400)).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.points_delta, 20);
        assert_eq!(replay.new_balances, first.new_balances);
        assert_eq!(replay.new_balances.points_balance, 20);
    }

    #[tokio::test]
    async fn test_top_voice_badge_from_counter() {
        let (engine, ledger, _rx) = engine();
        let mut last = None;
        for comment in ["c1", "c2", "c3", "c4", "c5"] {
            last = Some(
                engine
                    .process(EventEnvelope::new("user_1", comment, RewardEvent::TopComment))
                    .await
                    .unwrap(),
            );
        }

        let last = last.unwrap();
        assert_eq!(last.badges_awarded, vec!["top_voice".to_string()]);
        assert_eq!(ledger.wallet("user_1").await.unwrap().unwrap().top_comments, 5);
    }

    /// Ledger that fails every posting for one user.
    struct FailingFor {
        inner: InMemoryLedger,
        user_id: String,
    }

    #[async_trait::async_trait]
    impl LedgerStore for FailingFor {
        async fn apply(&self, posting: Posting) -> Result<PostingReceipt> {
            if posting.user_id == self.user_id {
                return Err(EconomyError::Storage("connection reset".to_string()));
            }
            self.inner.apply(posting).await
        }

        async fn apply_with_loan(&self, posting: Posting, loan: &Loan) -> Result<PostingReceipt> {
            self.inner.apply_with_loan(posting, loan).await
        }

        async fn balance(&self, user_id: &str, currency: Currency) -> Result<i64> {
            self.inner.balance(user_id, currency).await
        }

        async fn wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
            self.inner.wallet(user_id).await
        }

        async fn entries(&self, user_id: &str, currency: Currency) -> Result<Vec<LedgerEntry>> {
            self.inner.entries(user_id, currency).await
        }

        async fn receipt(&self, key: &IdempotencyKey) -> Result<Option<PostingReceipt>> {
            self.inner.receipt(key).await
        }

        async fn archive_wallet(&self, user_id: &str) -> Result<()> {
            self.inner.archive_wallet(user_id).await
        }
    }

    #[async_trait::async_trait]
    impl LoanStore for FailingFor {
        async fn loan(&self, loan_id: Uuid) -> Result<Option<Loan>> {
            self.inner.loan(loan_id).await
        }

        async fn loans_for_user(&self, user_id: &str) -> Result<Vec<Loan>> {
            self.inner.loans_for_user(user_id).await
        }

        async fn save_loan(&self, loan: &Loan) -> Result<()> {
            self.inner.save_loan(loan).await
        }

        async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
            self.inner.overdue_loans(now).await
        }

        async fn credit_score(&self, user_id: &str) -> Result<Option<CreditScore>> {
            self.inner.credit_score(user_id).await
        }

        async fn save_credit_score(&self, score: &CreditScore) -> Result<()> {
            self.inner.save_credit_score(score).await
        }
    }

    #[tokio::test]
    async fn test_failed_credit_reverses_debit() {
        let store = Arc::new(FailingFor {
            inner: InMemoryLedger::new(),
            user_id: "bob".to_string(),
        });
        let engine = RewardEngine::new(
            store.clone(),
            RewardRules::default(),
            BadgeCatalog::standard(),
            Arc::new(LogNotifier),
            RetryPolicy::default(),
        );
        engine.process(referral("alice", "ref_1", "carol")).await.unwrap();

        let err = engine.process(tip("alice", "t1", "bob", 20)).await.unwrap_err();
        assert_eq!(err.code(), "Storage");
        assert_eq!(store.balance("alice", Currency::Coins).await.unwrap(), 50);

        let entries = store.entries("alice", Currency::Coins).await.unwrap();
        let sum: i64 = entries.iter().map(|entry| entry.amount).sum();
        assert_eq!(sum, 50);
        assert!(entries.iter().any(|entry| entry.reference_id == "t1:reversed"));

        // The reference stays retired even once the recipient recovers
        let err = engine.process(tip("alice", "t1", "bob", 20)).await.unwrap_err();
        assert_eq!(err.code(), "InvalidEvent");
    }

    #[test]
    fn test_group_postings_merges_legs() {
        let deltas = RewardRules::default()
            .evaluate(&EventEnvelope::new("user_1", "c1", RewardEvent::TopComment))
            .unwrap();
        let postings = group_postings(&deltas, "c1");

        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].legs.len(), 2);
    }
}
