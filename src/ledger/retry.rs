//! Bounded retry for version conflicts

use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::warn;

use super::{EconomyStore, Posting, PostingReceipt};
use crate::error::Result;
use crate::loans::Loan;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 200,
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff with jitter
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_ms as f64 * 2.0_f64.powi(attempt as i32);
        let clamped = base.min(self.max_delay_ms as f64);

        let jitter_range = clamped * self.jitter_factor;
        let jitter: f64 = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_millis((clamped + jitter).max(0.0) as u64)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// exhausts `policy.max_attempts`. Only `ConcurrentModification` is retried.
pub async fn with_conflict_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %err,
                    "Version conflict, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// `store.apply(posting)` under `with_conflict_retry`.
pub async fn apply_with_retry(
    store: &Arc<dyn EconomyStore>,
    policy: &RetryPolicy,
    posting: Posting,
) -> Result<PostingReceipt> {
    with_conflict_retry(policy, "apply", || {
        let store = store.clone();
        let posting = posting.clone();
        async move { store.apply(posting).await }
    })
    .await
}

/// `store.apply_with_loan(posting, loan)` under `with_conflict_retry`.
pub async fn apply_with_loan_retry(
    store: &Arc<dyn EconomyStore>,
    policy: &RetryPolicy,
    posting: Posting,
    loan: &Loan,
) -> Result<PostingReceipt> {
    with_conflict_retry(policy, "apply_with_loan", || {
        let store = store.clone();
        let posting = posting.clone();
        let loan = loan.clone();
        async move { store.apply_with_loan(posting, &loan).await }
    })
    .await
}
