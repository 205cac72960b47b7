//! Ledger Module
//!
//! Append-only, dual-currency ledger. Balances are a projection of the entry
//! log, updated in the same unit of work that appends the entries.
//!
//! ## Currencies
//!
//! - Points: reputation/XP-like score, convertible to cash at read time
//! - Coins: spendable and giftable, the unit loans are denominated in
//!
//! ## Postings
//!
//! - One posting = one idempotency key `(reason, reference_id, user_id)`
//! - One or two currency legs, applied all-or-nothing
//! - Replays fail with `DuplicateApplication` carrying the original receipt

pub mod accounts;
pub mod retry;
pub mod store;
pub mod transfers;

pub use accounts::*;
pub use retry::{apply_with_loan_retry, apply_with_retry, with_conflict_retry, RetryPolicy};
pub use store::{EconomyStore, InMemoryLedger, LedgerStore, LoanStore};
pub use transfers::*;
