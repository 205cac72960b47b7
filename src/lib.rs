//! Wellness Economy Engine
//!
//! Dual-currency ledger (points and coins) with idempotent reward events,
//! tier-priced micro-loans and a top-comment reward cascade.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── engine.rs      - Wiring of ledger, rewards, loans and comments
//! ├── error.rs       - Error taxonomy
//! ├── locks.rs       - Per-key async mutexes
//! ├── notify.rs      - Notification payloads and notifiers
//! ├── ledger/        - Wallets, postings and the store seam
//! │   ├── accounts.rs  - Currencies, reasons, wallets
//! │   ├── transfers.rs - Postings, entries, receipts
//! │   ├── store.rs     - Store traits and the in-memory ledger
//! │   └── retry.rs     - Version-conflict retry
//! ├── rewards/       - Event rules, badges and the reward engine
//! ├── credit/        - Credit scores and tier terms
//! ├── loans/         - Loan records and the lending state machine
//! ├── cascade/       - Top-comment promotion
//! ├── api/           - HTTP API endpoints and middleware
//! └── database/      - PostgreSQL persistence
//! ```

pub mod api;
pub mod cascade;
pub mod config;
pub mod credit;
pub mod database;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod loans;
pub mod locks;
pub mod notify;
pub mod rewards;

// Re-export main types for convenience
pub use config::EconomyConfig;
pub use database::{DatabasePool, PgLedger};
pub use engine::{CreditView, CurrencyReconciliation, EconomyEngine, RewardEventRequest, WalletView};
pub use error::{EconomyError, Result};

// Re-export ledger types
pub use ledger::{
    Currency, EconomyStore, InMemoryLedger, LedgerEntry, LedgerReason, LedgerStore, LoanStore,
    Posting, PostingReceipt, RetryPolicy, Wallet,
};

// Re-export domain types
pub use cascade::{Comment, CommentBoard, LikeOutcome, Promotion};
pub use credit::{CreditPolicy, CreditScore, CreditTier};
pub use loans::{Loan, LoanPolicy, LoanStateMachine, LoanStatus};
pub use notify::{ChannelNotifier, LogNotifier, Notification, NotificationKind, Notifier};
pub use rewards::{BadgeCatalog, RewardEngine, RewardEvent, RewardOutcome, RewardRules};

// Re-export API types
pub use api::{EconomyApiState, create_economy_router};
