//! Posting and Entry Definitions
//!
//! A posting is one idempotent unit of work against a single user's wallet.
//! It carries one or more currency legs; each committed leg becomes an
//! immutable `LedgerEntry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Currency, LedgerReason};

/// `(reason, reference_id, user_id)`: a posting with the same key is applied at
/// most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub reason: LedgerReason,
    pub reference_id: String,
    pub user_id: String,
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.reason, self.reference_id, self.user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leg {
    pub currency: Currency,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub user_id: String,
    pub reason: LedgerReason,
    pub reference_id: String,
    pub legs: Vec<Leg>,
    /// Payload summary stored with the posting; a replay under the same key
    /// must carry the same value
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl Posting {
    pub fn new(user_id: impl Into<String>, reason: LedgerReason, reference_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            reason,
            reference_id: reference_id.into(),
            legs: Vec::new(),
            fingerprint: None,
        }
    }

    /// Single-currency posting.
    pub fn single(
        user_id: impl Into<String>,
        currency: Currency,
        amount: i64,
        reason: LedgerReason,
        reference_id: impl Into<String>,
    ) -> Self {
        Self::new(user_id, reason, reference_id).with_leg(currency, amount)
    }

    pub fn with_leg(mut self, currency: Currency, amount: i64) -> Self {
        self.add_leg(currency, amount);
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Option<String>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    /// Adds a leg, merging with an existing leg of the same currency.
    pub fn add_leg(&mut self, currency: Currency, amount: i64) {
        match self.legs.iter_mut().find(|leg| leg.currency == currency) {
            Some(leg) => leg.amount += amount,
            None => self.legs.push(Leg { currency, amount }),
        }
    }

    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            reason: self.reason,
            reference_id: self.reference_id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    pub fn amount_for(&self, currency: Currency) -> i64 {
        self.legs
            .iter()
            .filter(|leg| leg.currency == currency)
            .map(|leg| leg.amount)
            .sum()
    }
}

/// Immutable audit record of one committed leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: String,
    pub currency: Currency,
    /// Signed: credits positive, debits negative
    pub amount: i64,
    pub reason: LedgerReason,
    pub reference_id: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_leg(posting: &Posting, leg: &Leg, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: posting.user_id.clone(),
            currency: leg.currency,
            amount: leg.amount,
            reason: posting.reason,
            reference_id: posting.reference_id.clone(),
            created_at,
        }
    }
}

/// Result of a committed posting: its entries and the balances right after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingReceipt {
    pub key: IdempotencyKey,
    pub entries: Vec<LedgerEntry>,
    pub points_balance: i64,
    pub coins_balance: i64,
    #[serde(default)]
    pub fingerprint: Option<String>,
    pub committed_at: DateTime<Utc>,
}

impl PostingReceipt {
    pub fn delta(&self, currency: Currency) -> i64 {
        self.entries
            .iter()
            .filter(|entry| entry.currency == currency)
            .map(|entry| entry.amount)
            .sum()
    }

    pub fn balance(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Points => self.points_balance,
            Currency::Coins => self.coins_balance,
        }
    }

    /// Posting that undoes this one, keyed under `{reference_id}:reversed`.
    pub fn reversal(&self) -> Posting {
        let mut posting = Posting::new(
            self.key.user_id.clone(),
            self.key.reason,
            reversal_reference(&self.key.reference_id),
        );
        for entry in &self.entries {
            posting.add_leg(entry.currency, -entry.amount);
        }
        posting
    }
}

pub fn reversal_reference(reference_id: &str) -> String {
    format!("{reference_id}:reversed")
}
