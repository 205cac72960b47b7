//! Loan State Machine
//!
//! ```text
//!            request_loan              repay (amount_repaid ≥ total_due)
//!   none ──────────────────▶ active ─────────────────────────────────▶ repaid
//!                              │
//!                              │ sweep_defaults (now > due_date)
//!                              ▼
//!                          defaulted
//! ```
//!
//! `repaid` and `defaulted` are terminal. Each resolution updates the
//! borrower's credit record exactly once.

mod loan;
mod machine;

pub use loan::{Loan, LoanStatus};
pub use machine::{LoanPolicy, LoanStateMachine};
