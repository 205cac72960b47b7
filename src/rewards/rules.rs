//! Reward rule table
//!
//! Pure mapping from an event to currency deltas. The same event (same type,
//! reference id and user) always yields the same deltas, which is what lets
//! the ledger's duplicate rejection make replays safe.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EconomyError, Result};
use crate::ledger::{Currency, LedgerReason};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardEvent {
    PostCreated,
    /// `reward_points` overrides the configured default when present
    ChallengeCompleted { reward_points: Option<i64> },
    StreakBonus { days: u32 },
    BadgeEarned { badge_id: String, coins: Option<i64> },
    TopComment,
    ReferralClaimed { referee_id: String },
    TipSent { recipient_id: String, amount: i64 },
}

impl RewardEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RewardEvent::PostCreated => "post",
            RewardEvent::ChallengeCompleted { .. } => "challenge",
            RewardEvent::StreakBonus { .. } => "streak",
            RewardEvent::BadgeEarned { .. } => "badge",
            RewardEvent::TopComment => "top_comment",
            RewardEvent::ReferralClaimed { .. } => "referral",
            RewardEvent::TipSent { .. } => "tip",
        }
    }

    /// Payload that names a counterparty. A replay under the same reference
    /// must repeat it, or coins could be routed to a different user.
    pub fn fingerprint(&self) -> Option<String> {
        match self {
            RewardEvent::ReferralClaimed { referee_id } => Some(format!("referral:{referee_id}")),
            RewardEvent::TipSent { recipient_id, amount } => Some(format!("tip:{recipient_id}:{amount}")),
            _ => None,
        }
    }

    /// Builds a typed event from the wire form. Unknown types are rejected,
    /// never ignored.
    pub fn parse(event_type: &str, metadata: &Value) -> Result<Self> {
        let event = match event_type {
            "post" | "post_created" => RewardEvent::PostCreated,
            "challenge" | "challenge_completed" => RewardEvent::ChallengeCompleted {
                reward_points: optional_i64(metadata, "rewardPoints")?,
            },
            "streak" => {
                let days = required_i64(metadata, "days")?;
                let days = u32::try_from(days)
                    .map_err(|_| EconomyError::InvalidEvent(format!("invalid streak length {days}")))?;
                RewardEvent::StreakBonus { days }
            }
            "badge" => RewardEvent::BadgeEarned {
                badge_id: required_str(metadata, "badgeId")?,
                coins: optional_i64(metadata, "coins")?,
            },
            "top_comment" => RewardEvent::TopComment,
            "referral" => RewardEvent::ReferralClaimed {
                referee_id: required_str(metadata, "refereeId")?,
            },
            "tip" | "tip_sent" => RewardEvent::TipSent {
                recipient_id: required_str(metadata, "recipientId")?,
                amount: required_i64(metadata, "amount")?,
            },
            other => return Err(EconomyError::UnknownEventType(other.to_string())),
        };
        Ok(event)
    }
}

fn field<'a>(metadata: &'a Value, key: &str) -> Option<&'a Value> {
    metadata.get(key).filter(|value| !value.is_null())
}

fn required_str(metadata: &Value, key: &str) -> Result<String> {
    field(metadata, key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| EconomyError::InvalidEvent(format!("metadata.{key} is required")))
}

fn optional_i64(metadata: &Value, key: &str) -> Result<Option<i64>> {
    match field(metadata, key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| EconomyError::InvalidEvent(format!("metadata.{key} must be an integer"))),
    }
}

fn required_i64(metadata: &Value, key: &str) -> Result<i64> {
    optional_i64(metadata, key)?
        .ok_or_else(|| EconomyError::InvalidEvent(format!("metadata.{key} is required")))
}

/// An event addressed to a user, with the reference that makes it unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub user_id: String,
    pub reference_id: String,
    pub event: RewardEvent,
}

impl EventEnvelope {
    pub fn new(user_id: impl Into<String>, reference_id: impl Into<String>, event: RewardEvent) -> Self {
        Self {
            user_id: user_id.into(),
            reference_id: reference_id.into(),
            event,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyDelta {
    pub user_id: String,
    pub currency: Currency,
    pub amount: i64,
    pub reason: LedgerReason,
}

impl CurrencyDelta {
    fn new(user_id: &str, currency: Currency, amount: i64, reason: LedgerReason) -> Self {
        Self {
            user_id: user_id.to_string(),
            currency,
            amount,
            reason,
        }
    }
}

/// Base rewards per event type (governance-configurable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardRules {
    pub post_points: i64,
    pub challenge_points: i64,
    pub streak_points_per_day: i64,
    /// Ceiling on a single streak bonus
    pub streak_max_points: i64,
    pub badge_coins: i64,
    pub top_comment_coins: i64,
    pub top_comment_points: i64,
    /// Likes a comment needs before it can be promoted to top
    pub top_comment_like_threshold: u32,
    pub referrer_coins: i64,
    pub referee_coins: i64,
}

impl Default for RewardRules {
    fn default() -> Self {
        Self {
            post_points: 5,
            challenge_points: 20,
            streak_points_per_day: 3,
            streak_max_points: 30,
            badge_coins: 10,
            top_comment_coins: 5,
            top_comment_points: 50,
            top_comment_like_threshold: 3,
            referrer_coins: 50,
            referee_coins: 25,
        }
    }
}

impl RewardRules {
    /// Currency deltas for `envelope`, in the order they must be applied.
    /// Debits come before the credits they fund.
    pub fn evaluate(&self, envelope: &EventEnvelope) -> Result<Vec<CurrencyDelta>> {
        let user = envelope.user_id.as_str();
        if user.is_empty() {
            return Err(EconomyError::InvalidEvent("userId is required".to_string()));
        }
        if envelope.reference_id.is_empty() {
            return Err(EconomyError::InvalidEvent("referenceId is required".to_string()));
        }

        let deltas = match &envelope.event {
            RewardEvent::PostCreated => vec![CurrencyDelta::new(
                user,
                Currency::Points,
                self.post_points,
                LedgerReason::Post,
            )],
            RewardEvent::ChallengeCompleted { reward_points } => {
                let points = reward_points.unwrap_or(self.challenge_points);
                if points <= 0 {
                    return Err(EconomyError::InvalidAmount(points));
                }
                vec![CurrencyDelta::new(user, Currency::Points, points, LedgerReason::Challenge)]
            }
            RewardEvent::StreakBonus { days } => {
                if *days == 0 {
                    return Err(EconomyError::InvalidEvent("streak of zero days".to_string()));
                }
                let points = (i64::from(*days) * self.streak_points_per_day).min(self.streak_max_points);
                vec![CurrencyDelta::new(user, Currency::Points, points, LedgerReason::Streak)]
            }
            RewardEvent::BadgeEarned { coins, .. } => {
                let coins = coins.unwrap_or(self.badge_coins);
                if coins <= 0 {
                    return Err(EconomyError::InvalidAmount(coins));
                }
                vec![CurrencyDelta::new(user, Currency::Coins, coins, LedgerReason::Badge)]
            }
            RewardEvent::TopComment => vec![
                CurrencyDelta::new(user, Currency::Coins, self.top_comment_coins, LedgerReason::TopComment),
                CurrencyDelta::new(user, Currency::Points, self.top_comment_points, LedgerReason::TopComment),
            ],
            RewardEvent::ReferralClaimed { referee_id } => {
                if referee_id == user {
                    return Err(EconomyError::InvalidEvent("users cannot refer themselves".to_string()));
                }
                vec![
                    CurrencyDelta::new(user, Currency::Coins, self.referrer_coins, LedgerReason::Referral),
                    CurrencyDelta::new(referee_id, Currency::Coins, self.referee_coins, LedgerReason::Referral),
                ]
            }
            RewardEvent::TipSent { recipient_id, amount } => {
                if *amount <= 0 {
                    return Err(EconomyError::InvalidAmount(*amount));
                }
                if recipient_id == user {
                    return Err(EconomyError::InvalidEvent("users cannot tip themselves".to_string()));
                }
                vec![
                    CurrencyDelta::new(user, Currency::Coins, -amount, LedgerReason::TipSent),
                    CurrencyDelta::new(recipient_id, Currency::Coins, *amount, LedgerReason::TipReceived),
                ]
            }
        };

        Ok(deltas.into_iter().filter(|delta| delta.amount != 0).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event: RewardEvent) -> EventEnvelope {
        EventEnvelope::new("user_1", "ref_1", event)
    }

    #[test]
    fn test_post_reward() {
        let deltas = RewardRules::default()
            .evaluate(&envelope(RewardEvent::PostCreated))
            .unwrap();
        assert_eq!(deltas, vec![CurrencyDelta::new("user_1", Currency::Points, 5, LedgerReason::Post)]);
    }

    #[test]
    fn test_streak_is_capped() {
        let rules = RewardRules::default();
        let short = rules.evaluate(&envelope(RewardEvent::StreakBonus { days: 4 })).unwrap();
        let long = rules.evaluate(&envelope(RewardEvent::StreakBonus { days: 40 })).unwrap();

        assert_eq!(short[0].amount, 12);
        assert_eq!(long[0].amount, 30);
    }

    #[test]
    fn test_top_comment_pays_both_currencies() {
        let deltas = RewardRules::default()
            .evaluate(&envelope(RewardEvent::TopComment))
            .unwrap();

        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().any(|d| d.currency == Currency::Coins && d.amount == 5));
        assert!(deltas.iter().any(|d| d.currency == Currency::Points && d.amount == 50));
    }

    #[test]
    fn test_referral_credits_both_sides() {
        let deltas = RewardRules::default()
            .evaluate(&envelope(RewardEvent::ReferralClaimed {
                referee_id: "user_2".to_string(),
            }))
            .unwrap();

        assert_eq!(deltas[0].user_id, "user_1");
        assert_eq!(deltas[0].amount, 50);
        assert_eq!(deltas[1].user_id, "user_2");
        assert_eq!(deltas[1].amount, 25);
    }

    #[test]
    fn test_tip_debits_sender_first() {
        let deltas = RewardRules::default()
            .evaluate(&envelope(RewardEvent::TipSent {
                recipient_id: "user_2".to_string(),
                amount: 7,
            }))
            .unwrap();

        assert_eq!(deltas[0].amount, -7);
        assert_eq!(deltas[0].reason, LedgerReason::TipSent);
        assert_eq!(deltas[1].amount, 7);
        assert_eq!(deltas[1].reason, LedgerReason::TipReceived);
    }

    #[test]
    fn test_self_tip_rejected() {
        let err = RewardRules::default()
            .evaluate(&envelope(RewardEvent::TipSent {
                recipient_id: "user_1".to_string(),
                amount: 7,
            }))
            .unwrap_err();
        assert!(matches!(err, EconomyError::InvalidEvent(_)));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let rules = RewardRules::default();
        let event = envelope(RewardEvent::ChallengeCompleted { reward_points: Some(40) });
        assert_eq!(rules.evaluate(&event).unwrap(), rules.evaluate(&event).unwrap());
    }

    #[test]
    fn test_parse_wire_events() {
        assert_eq!(RewardEvent::parse("post", &json!({})).unwrap(), RewardEvent::PostCreated);
        assert_eq!(
            RewardEvent::parse("tip", &json!({"recipientId": "user_2", "amount": 3})).unwrap(),
            RewardEvent::TipSent {
                recipient_id: "user_2".to_string(),
                amount: 3
            }
        );
        assert_eq!(
            RewardEvent::parse("challenge", &json!(null)).unwrap(),
            RewardEvent::ChallengeCompleted { reward_points: None }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(matches!(
            RewardEvent::parse("lottery", &json!({})),
            Err(EconomyError::UnknownEventType(t)) if t == "lottery"
        ));
        assert!(matches!(
            RewardEvent::parse("referral", &json!({})),
            Err(EconomyError::InvalidEvent(_))
        ));
        assert!(matches!(
            RewardEvent::parse("streak", &json!({"days": "three"})),
            Err(EconomyError::InvalidEvent(_))
        ));
    }
}
