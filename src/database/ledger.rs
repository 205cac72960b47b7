//! Ledger Repository - PostgreSQL implementation of the economy store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::credit::{CreditScore, CreditTier};
use crate::error::{EconomyError, Result};
use crate::ledger::store::{project_wallet, validate_posting};
use crate::ledger::{
    Currency, IdempotencyKey, LedgerEntry, LedgerReason, LedgerStore, LoanStore, Posting,
    PostingReceipt, Wallet,
};
use crate::loans::{Loan, LoanStatus};

/// Name of the partial unique index allowing one active loan per user.
pub const ONE_ACTIVE_LOAN_INDEX: &str = "loans_one_active_per_user";

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs one posting in one transaction: duplicate check, versioned wallet
    /// write, posting row, entries, and the optional loan row.
    async fn commit(&self, posting: Posting, loan: Option<&Loan>) -> Result<PostingReceipt> {
        validate_posting(&posting)?;

        let mut tx = self.pool.begin().await?;

        if let Some(prior) = fetch_receipt(&mut tx, &posting.key()).await? {
            return Err(EconomyError::DuplicateApplication(Box::new(prior)));
        }

        let row = sqlx::query(
            r#"
            SELECT user_id, points_balance, coins_balance, total_earned, creator_level,
                   can_monetize, top_comments, archived, version, created_at, updated_at
            FROM economy.wallets
            WHERE user_id = $1
            "#,
        )
        .bind(&posting.user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let current = row.as_ref().map(wallet_from_row);

        let now = Utc::now();
        let base = current
            .clone()
            .unwrap_or_else(|| Wallet::new(posting.user_id.clone()));
        let next = project_wallet(&base, &posting, now)?;

        let written = match &current {
            Some(previous) => sqlx::query(
                r#"
                UPDATE economy.wallets
                SET points_balance = $2, coins_balance = $3, total_earned = $4,
                    creator_level = $5, can_monetize = $6, top_comments = $7,
                    version = $8, updated_at = $9
                WHERE user_id = $1 AND version = $10
                "#,
            )
            .bind(&next.user_id)
            .bind(next.points_balance)
            .bind(next.coins_balance)
            .bind(next.total_earned)
            .bind(next.creator_level as i32)
            .bind(next.can_monetize)
            .bind(next.top_comments as i32)
            .bind(next.version)
            .bind(next.updated_at)
            .bind(previous.version)
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            None => insert_wallet(&mut tx, &next).await?,
        };
        if written == 0 {
            return Err(EconomyError::ConcurrentModification(format!(
                "wallet {} changed during posting",
                posting.user_id
            )));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO economy.postings
            (reason, reference_id, user_id, points_balance, coins_balance, fingerprint, committed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(posting.reason.code() as i16)
        .bind(&posting.reference_id)
        .bind(&posting.user_id)
        .bind(next.points_balance)
        .bind(next.coins_balance)
        .bind(&posting.fingerprint)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Err(EconomyError::ConcurrentModification(format!(
                "posting {} committed concurrently",
                posting.key()
            )));
        }

        let mut entries = Vec::with_capacity(posting.legs.len());
        for leg in &posting.legs {
            let entry = LedgerEntry::from_leg(&posting, leg, now);
            sqlx::query(
                r#"
                INSERT INTO economy.ledger_entries
                (id, user_id, currency, amount, reason, reference_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id)
            .bind(&entry.user_id)
            .bind(entry.currency.code() as i16)
            .bind(entry.amount)
            .bind(entry.reason.code() as i16)
            .bind(&entry.reference_id)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
            entries.push(entry);
        }

        if let Some(loan) = loan {
            if let Err(e) = upsert_loan(&mut *tx, loan).await {
                return Err(self.loan_write_error(e, loan).await);
            }
        }

        tx.commit().await?;

        let receipt = PostingReceipt {
            key: posting.key(),
            entries,
            points_balance: next.points_balance,
            coins_balance: next.coins_balance,
            fingerprint: posting.fingerprint.clone(),
            committed_at: now,
        };
        debug!(
            key = %receipt.key,
            points = receipt.points_balance,
            coins = receipt.coins_balance,
            version = next.version,
            "Posting committed"
        );
        Ok(receipt)
    }

    /// Maps a violation of the one-active-loan index to `LoanAlreadyActive`.
    async fn loan_write_error(&self, err: sqlx::Error, loan: &Loan) -> EconomyError {
        let violated = err
            .as_database_error()
            .and_then(|db| db.constraint())
            .is_some_and(|constraint| constraint == ONE_ACTIVE_LOAN_INDEX);
        if !violated {
            return err.into();
        }

        let existing = sqlx::query(
            "SELECT id FROM economy.loans WHERE user_id = $1 AND status = 'active' LIMIT 1",
        )
        .bind(&loan.user_id)
        .fetch_optional(&self.pool)
        .await;
        match existing {
            Ok(Some(row)) => EconomyError::LoanAlreadyActive { loan_id: row.get("id") },
            Ok(None) => EconomyError::ConcurrentModification(format!("loan {} raced", loan.id)),
            Err(e) => e.into(),
        }
    }
}

async fn insert_wallet(tx: &mut Transaction<'_, Postgres>, wallet: &Wallet) -> Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO economy.wallets
        (user_id, points_balance, coins_balance, total_earned, creator_level,
         can_monetize, top_comments, archived, version, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(&wallet.user_id)
    .bind(wallet.points_balance)
    .bind(wallet.coins_balance)
    .bind(wallet.total_earned)
    .bind(wallet.creator_level as i32)
    .bind(wallet.can_monetize)
    .bind(wallet.top_comments as i32)
    .bind(wallet.archived)
    .bind(wallet.version)
    .bind(wallet.created_at)
    .bind(wallet.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn fetch_receipt(
    tx: &mut Transaction<'_, Postgres>,
    key: &IdempotencyKey,
) -> Result<Option<PostingReceipt>> {
    let reason = key.reason.code() as i16;
    let row = sqlx::query(
        r#"
        SELECT points_balance, coins_balance, fingerprint, committed_at
        FROM economy.postings
        WHERE reason = $1 AND reference_id = $2 AND user_id = $3
        "#,
    )
    .bind(reason)
    .bind(&key.reference_id)
    .bind(&key.user_id)
    .fetch_optional(&mut **tx)
    .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let entries = sqlx::query(
        r#"
        SELECT id, user_id, currency, amount, reason, reference_id, created_at
        FROM economy.ledger_entries
        WHERE reason = $1 AND reference_id = $2 AND user_id = $3
        ORDER BY currency
        "#,
    )
    .bind(reason)
    .bind(&key.reference_id)
    .bind(&key.user_id)
    .fetch_all(&mut **tx)
    .await?
    .iter()
    .map(entry_from_row)
    .collect::<Result<Vec<_>>>()?;

    Ok(Some(PostingReceipt {
        key: key.clone(),
        entries,
        points_balance: row.get("points_balance"),
        coins_balance: row.get("coins_balance"),
        fingerprint: row.get("fingerprint"),
        committed_at: row.get("committed_at"),
    }))
}

async fn upsert_loan<'e, E>(executor: E, loan: &Loan) -> std::result::Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO economy.loans
        (id, user_id, principal, term_days, interest_rate_pct, total_due, amount_repaid,
         recovered_on_default, payments_made, status, created_at, due_date, resolved_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO UPDATE SET
            amount_repaid = EXCLUDED.amount_repaid,
            recovered_on_default = EXCLUDED.recovered_on_default,
            payments_made = EXCLUDED.payments_made,
            status = EXCLUDED.status,
            resolved_at = EXCLUDED.resolved_at
        "#,
    )
    .bind(loan.id)
    .bind(&loan.user_id)
    .bind(loan.principal)
    .bind(loan.term_days as i32)
    .bind(loan.interest_rate_pct as i32)
    .bind(loan.total_due)
    .bind(loan.amount_repaid)
    .bind(loan.recovered_on_default)
    .bind(loan.payments_made as i32)
    .bind(loan.status.as_str())
    .bind(loan.created_at)
    .bind(loan.due_date)
    .bind(loan.resolved_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn wallet_from_row(row: &PgRow) -> Wallet {
    Wallet {
        user_id: row.get("user_id"),
        points_balance: row.get("points_balance"),
        coins_balance: row.get("coins_balance"),
        total_earned: row.get("total_earned"),
        creator_level: row.get::<i32, _>("creator_level") as u32,
        can_monetize: row.get("can_monetize"),
        top_comments: row.get::<i32, _>("top_comments") as u32,
        archived: row.get("archived"),
        version: row.get("version"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let currency: i16 = row.get("currency");
    let reason: i16 = row.get("reason");
    Ok(LedgerEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        currency: Currency::from_code(currency as u16)
            .ok_or_else(|| EconomyError::Storage(format!("unknown currency code {currency}")))?,
        amount: row.get("amount"),
        reason: LedgerReason::from_code(reason as u16)
            .ok_or_else(|| EconomyError::Storage(format!("unknown reason code {reason}")))?,
        reference_id: row.get("reference_id"),
        created_at: row.get("created_at"),
    })
}

fn loan_from_row(row: &PgRow) -> Result<Loan> {
    let status: String = row.get("status");
    Ok(Loan {
        id: row.get("id"),
        user_id: row.get("user_id"),
        principal: row.get("principal"),
        term_days: row.get::<i32, _>("term_days") as u32,
        interest_rate_pct: row.get::<i32, _>("interest_rate_pct") as u32,
        total_due: row.get("total_due"),
        amount_repaid: row.get("amount_repaid"),
        recovered_on_default: row.get("recovered_on_default"),
        payments_made: row.get::<i32, _>("payments_made") as u32,
        status: LoanStatus::parse(&status)
            .ok_or_else(|| EconomyError::Storage(format!("unknown loan status {status}")))?,
        created_at: row.get("created_at"),
        due_date: row.get("due_date"),
        resolved_at: row.get("resolved_at"),
    })
}

fn credit_from_row(row: &PgRow) -> Result<CreditScore> {
    let tier: String = row.get("tier");
    Ok(CreditScore {
        user_id: row.get("user_id"),
        score: row.get::<i32, _>("score") as u32,
        tier: CreditTier::parse(&tier)
            .ok_or_else(|| EconomyError::Storage(format!("unknown credit tier {tier}")))?,
        credit_limit: row.get("credit_limit"),
        interest_rate_pct: row.get::<i32, _>("interest_rate_pct") as u32,
        on_time_payments: row.get::<i32, _>("on_time_payments") as u32,
        late_payments: row.get::<i32, _>("late_payments") as u32,
        total_loans_completed: row.get::<i32, _>("total_loans_completed") as u32,
        updated_at: row.get("updated_at"),
    })
}

const LOAN_COLUMNS: &str = "id, user_id, principal, term_days, interest_rate_pct, total_due, \
    amount_repaid, recovered_on_default, payments_made, status, created_at, due_date, resolved_at";

#[async_trait]
impl LedgerStore for PgLedger {
    async fn apply(&self, posting: Posting) -> Result<PostingReceipt> {
        self.commit(posting, None).await
    }

    async fn apply_with_loan(&self, posting: Posting, loan: &Loan) -> Result<PostingReceipt> {
        self.commit(posting, Some(loan)).await
    }

    async fn balance(&self, user_id: &str, currency: Currency) -> Result<i64> {
        Ok(self
            .wallet(user_id)
            .await?
            .map(|wallet| wallet.balance(currency))
            .unwrap_or(0))
    }

    async fn wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, points_balance, coins_balance, total_earned, creator_level,
                   can_monetize, top_comments, archived, version, created_at, updated_at
            FROM economy.wallets
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(wallet_from_row))
    }

    async fn entries(&self, user_id: &str, currency: Currency) -> Result<Vec<LedgerEntry>> {
        sqlx::query(
            r#"
            SELECT id, user_id, currency, amount, reason, reference_id, created_at
            FROM economy.ledger_entries
            WHERE user_id = $1 AND currency = $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .bind(currency.code() as i16)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(entry_from_row)
        .collect()
    }

    async fn receipt(&self, key: &IdempotencyKey) -> Result<Option<PostingReceipt>> {
        let mut tx = self.pool.begin().await?;
        let receipt = fetch_receipt(&mut tx, key).await?;
        tx.commit().await?;
        Ok(receipt)
    }

    async fn archive_wallet(&self, user_id: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO economy.wallets
            (user_id, points_balance, coins_balance, total_earned, creator_level,
             can_monetize, archived, version, created_at, updated_at)
            VALUES ($1, 0, 0, 0, 1, FALSE, TRUE, 1, $2, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                archived = TRUE,
                version = economy.wallets.version + 1,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(user_id = %user_id, "Wallet archived");
        Ok(())
    }
}

#[async_trait]
impl LoanStore for PgLedger {
    async fn loan(&self, loan_id: Uuid) -> Result<Option<Loan>> {
        let sql = format!("SELECT {LOAN_COLUMNS} FROM economy.loans WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(loan_from_row).transpose()
    }

    async fn loans_for_user(&self, user_id: &str) -> Result<Vec<Loan>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM economy.loans WHERE user_id = $1 ORDER BY created_at ASC"
        );
        sqlx::query(&sql)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(loan_from_row)
        .collect()
    }

    async fn save_loan(&self, loan: &Loan) -> Result<()> {
        if let Err(e) = upsert_loan(&self.pool, loan).await {
            return Err(self.loan_write_error(e, loan).await);
        }
        Ok(())
    }

    async fn overdue_loans(&self, now: DateTime<Utc>) -> Result<Vec<Loan>> {
        let sql = format!(
            "SELECT {LOAN_COLUMNS} FROM economy.loans \
             WHERE status = 'active' AND due_date < $1 AND amount_repaid < total_due \
             ORDER BY due_date ASC"
        );
        sqlx::query(&sql)
        .bind(now)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(loan_from_row)
        .collect()
    }

    async fn credit_score(&self, user_id: &str) -> Result<Option<CreditScore>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, score, tier, credit_limit, interest_rate_pct, on_time_payments,
                   late_payments, total_loans_completed, updated_at
            FROM economy.credit_scores
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(credit_from_row).transpose()
    }

    async fn save_credit_score(&self, score: &CreditScore) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO economy.credit_scores
            (user_id, score, tier, credit_limit, interest_rate_pct, on_time_payments,
             late_payments, total_loans_completed, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id) DO UPDATE SET
                score = EXCLUDED.score,
                tier = EXCLUDED.tier,
                credit_limit = EXCLUDED.credit_limit,
                interest_rate_pct = EXCLUDED.interest_rate_pct,
                on_time_payments = EXCLUDED.on_time_payments,
                late_payments = EXCLUDED.late_payments,
                total_loans_completed = EXCLUDED.total_loans_completed,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&score.user_id)
        .bind(score.score as i32)
        .bind(score.tier.as_str())
        .bind(score.credit_limit)
        .bind(score.interest_rate_pct as i32)
        .bind(score.on_time_payments as i32)
        .bind(score.late_payments as i32)
        .bind(score.total_loans_completed as i32)
        .bind(score.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %score.user_id, score = score.score, tier = score.tier.as_str(), "Credit score saved");
        Ok(())
    }
}
