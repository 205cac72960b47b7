//! Currency and Reason Definitions
//!
//! Defines the two wallet currencies, the reasons a ledger entry can carry,
//! and the wallet projection kept consistent with the entry log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Points earned per creator level.
pub const POINTS_PER_LEVEL: i64 = 500;

/// Creator level at which a wallet becomes eligible for monetization.
pub const MONETIZE_LEVEL: u32 = 5;

pub mod currency_codes {
    pub const POINTS: u16 = 1;
    pub const COINS: u16 = 2;
}

pub mod reason_codes {
    pub const POST: u16 = 1;
    pub const CHALLENGE: u16 = 2;
    pub const STREAK: u16 = 3;
    pub const BADGE: u16 = 4;
    pub const TOP_COMMENT: u16 = 5;
    pub const REFERRAL: u16 = 6;
    pub const TIP_SENT: u16 = 7;
    pub const TIP_RECEIVED: u16 = 8;
    pub const LOAN_DISBURSEMENT: u16 = 20;
    pub const LOAN_REPAYMENT: u16 = 21;
    pub const LOAN_PENALTY: u16 = 22;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Points,
    Coins,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Points, Currency::Coins];

    pub fn code(&self) -> u16 {
        match self {
            Currency::Points => currency_codes::POINTS,
            Currency::Coins => currency_codes::COINS,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            currency_codes::POINTS => Some(Currency::Points),
            currency_codes::COINS => Some(Currency::Coins),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Points => "points",
            Currency::Coins => "coins",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "points" => Some(Currency::Points),
            "coins" => Some(Currency::Coins),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a ledger entry exists. Together with the reference id and user id it
/// forms the idempotency key of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerReason {
    Post,
    Challenge,
    Streak,
    Badge,
    TopComment,
    Referral,
    TipSent,
    TipReceived,
    LoanDisbursement,
    LoanRepayment,
    LoanPenalty,
}

impl LedgerReason {
    pub const ALL: [LedgerReason; 11] = [
        LedgerReason::Post,
        LedgerReason::Challenge,
        LedgerReason::Streak,
        LedgerReason::Badge,
        LedgerReason::TopComment,
        LedgerReason::Referral,
        LedgerReason::TipSent,
        LedgerReason::TipReceived,
        LedgerReason::LoanDisbursement,
        LedgerReason::LoanRepayment,
        LedgerReason::LoanPenalty,
    ];

    pub fn code(&self) -> u16 {
        match self {
            LedgerReason::Post => reason_codes::POST,
            LedgerReason::Challenge => reason_codes::CHALLENGE,
            LedgerReason::Streak => reason_codes::STREAK,
            LedgerReason::Badge => reason_codes::BADGE,
            LedgerReason::TopComment => reason_codes::TOP_COMMENT,
            LedgerReason::Referral => reason_codes::REFERRAL,
            LedgerReason::TipSent => reason_codes::TIP_SENT,
            LedgerReason::TipReceived => reason_codes::TIP_RECEIVED,
            LedgerReason::LoanDisbursement => reason_codes::LOAN_DISBURSEMENT,
            LedgerReason::LoanRepayment => reason_codes::LOAN_REPAYMENT,
            LedgerReason::LoanPenalty => reason_codes::LOAN_PENALTY,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|reason| reason.code() == code)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Post => "post",
            LedgerReason::Challenge => "challenge",
            LedgerReason::Streak => "streak",
            LedgerReason::Badge => "badge",
            LedgerReason::TopComment => "top_comment",
            LedgerReason::Referral => "referral",
            LedgerReason::TipSent => "tip_sent",
            LedgerReason::TipReceived => "tip_received",
            LedgerReason::LoanDisbursement => "loan_disbursement",
            LedgerReason::LoanRepayment => "loan_repayment",
            LedgerReason::LoanPenalty => "loan_penalty",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let reason = match value {
            "post" => LedgerReason::Post,
            "challenge" => LedgerReason::Challenge,
            "streak" => LedgerReason::Streak,
            "badge" => LedgerReason::Badge,
            "top_comment" => LedgerReason::TopComment,
            "referral" => LedgerReason::Referral,
            "tip_sent" => LedgerReason::TipSent,
            "tip_received" => LedgerReason::TipReceived,
            "loan_disbursement" => LedgerReason::LoanDisbursement,
            "loan_repayment" => LedgerReason::LoanRepayment,
            "loan_penalty" => LedgerReason::LoanPenalty,
            _ => return None,
        };
        Some(reason)
    }

    /// Credits under these reasons count toward `total_earned`.
    pub fn is_earning(&self) -> bool {
        !matches!(
            self,
            LedgerReason::TipSent
                | LedgerReason::LoanDisbursement
                | LedgerReason::LoanRepayment
                | LedgerReason::LoanPenalty
        )
    }
}

impl std::fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user balance projection. Only the ledger store mutates it, in the same
/// unit of work that appends the matching entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: String,
    pub points_balance: i64,
    pub coins_balance: i64,
    /// Points credited under earning reasons; never decreases
    pub total_earned: i64,
    pub creator_level: u32,
    pub can_monetize: bool,
    /// Top-comment postings received
    pub top_comments: u32,
    pub archived: bool,
    /// Bumped on every committed posting
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            points_balance: 0,
            coins_balance: 0,
            total_earned: 0,
            creator_level: 1,
            can_monetize: false,
            top_comments: 0,
            archived: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Points => self.points_balance,
            Currency::Coins => self.coins_balance,
        }
    }

    pub fn balance_mut(&mut self, currency: Currency) -> &mut i64 {
        match currency {
            Currency::Points => &mut self.points_balance,
            Currency::Coins => &mut self.coins_balance,
        }
    }

    /// Re-derive level and monetization from `total_earned`.
    pub fn refresh_level(&mut self) {
        self.creator_level = creator_level_for(self.total_earned);
        self.can_monetize = self.creator_level >= MONETIZE_LEVEL;
    }
}

pub fn creator_level_for(total_earned: i64) -> u32 {
    let level = 1 + total_earned.max(0) / POINTS_PER_LEVEL;
    u32::try_from(level).unwrap_or(u32::MAX)
}
