//! Reward Rule Engine
//!
//! Maps wellness events to currency deltas and applies them to the ledger.
//!
//! ## Event Flow
//!
//! ```text
//! event ──▶ RewardRules::evaluate ──▶ deltas ──▶ postings ──▶ ledger
//!                                                     │
//!                                                     ├──▶ badge checks
//!                                                     └──▶ notifications
//! ```
//!
//! ## Base Rewards
//!
//! | Event        | Reward                          |
//! |--------------|---------------------------------|
//! | post         | +5 points                       |
//! | challenge    | +20 points (or event override)  |
//! | streak       | +3 points/day, capped at 30     |
//! | badge        | +10 coins (or event override)   |
//! | top_comment  | +5 coins, +50 points            |
//! | referral     | +50 coins referrer, +25 referee |
//! | tip          | coins moved sender ▶ recipient  |

pub mod badges;
pub mod engine;
pub mod rules;

pub use badges::{BadgeCatalog, BadgeCriterion, BadgeDefinition, BadgeProgress};
pub use engine::{Balances, RewardEngine, RewardOutcome};
pub use rules::{CurrencyDelta, EventEnvelope, RewardEvent, RewardRules};
