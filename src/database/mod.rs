//! PostgreSQL Database Module
//!
//! Persists the ledger, loans and credit scores in the `economy` schema.
//! Every posting commits in a single transaction together with any loan row
//! it moves.

pub mod ledger;
pub mod pool;

pub use ledger::PgLedger;
pub use pool::DatabasePool;
