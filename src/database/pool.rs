//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::database::ledger::{PgLedger, ONE_ACTIVE_LOAN_INDEX};
use crate::error::{EconomyError, Result};

const SCHEMA: &[&str] = &[
    "CREATE SCHEMA IF NOT EXISTS economy",
    r#"
    CREATE TABLE IF NOT EXISTS economy.wallets (
        user_id         TEXT PRIMARY KEY,
        points_balance  BIGINT NOT NULL DEFAULT 0 CHECK (points_balance >= 0),
        coins_balance   BIGINT NOT NULL DEFAULT 0 CHECK (coins_balance >= 0),
        total_earned    BIGINT NOT NULL DEFAULT 0,
        creator_level   INTEGER NOT NULL DEFAULT 1,
        can_monetize    BOOLEAN NOT NULL DEFAULT FALSE,
        top_comments    INTEGER NOT NULL DEFAULT 0,
        archived        BOOLEAN NOT NULL DEFAULT FALSE,
        version         BIGINT NOT NULL DEFAULT 0,
        created_at      TIMESTAMPTZ NOT NULL,
        updated_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS economy.postings (
        reason          SMALLINT NOT NULL,
        reference_id    TEXT NOT NULL,
        user_id         TEXT NOT NULL,
        points_balance  BIGINT NOT NULL,
        coins_balance   BIGINT NOT NULL,
        fingerprint     TEXT,
        committed_at    TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (reason, reference_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS economy.ledger_entries (
        id              UUID PRIMARY KEY,
        user_id         TEXT NOT NULL,
        currency        SMALLINT NOT NULL,
        amount          BIGINT NOT NULL CHECK (amount <> 0),
        reason          SMALLINT NOT NULL,
        reference_id    TEXT NOT NULL,
        created_at      TIMESTAMPTZ NOT NULL,
        FOREIGN KEY (reason, reference_id, user_id)
            REFERENCES economy.postings (reason, reference_id, user_id)
    )
    "#,
    "ALTER TABLE economy.wallets ADD COLUMN IF NOT EXISTS top_comments INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE economy.postings ADD COLUMN IF NOT EXISTS fingerprint TEXT",
    "CREATE INDEX IF NOT EXISTS ledger_entries_by_user \
     ON economy.ledger_entries (user_id, currency, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS economy.credit_scores (
        user_id                 TEXT PRIMARY KEY,
        score                   INTEGER NOT NULL,
        tier                    TEXT NOT NULL,
        credit_limit            BIGINT NOT NULL,
        interest_rate_pct       INTEGER NOT NULL,
        on_time_payments        INTEGER NOT NULL DEFAULT 0,
        late_payments           INTEGER NOT NULL DEFAULT 0,
        total_loans_completed   INTEGER NOT NULL DEFAULT 0,
        updated_at              TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS economy.loans (
        id                      UUID PRIMARY KEY,
        user_id                 TEXT NOT NULL,
        principal               BIGINT NOT NULL CHECK (principal > 0),
        term_days               INTEGER NOT NULL,
        interest_rate_pct       INTEGER NOT NULL,
        total_due               BIGINT NOT NULL,
        amount_repaid           BIGINT NOT NULL DEFAULT 0,
        recovered_on_default    BIGINT NOT NULL DEFAULT 0,
        payments_made           INTEGER NOT NULL DEFAULT 0,
        status                  TEXT NOT NULL,
        created_at              TIMESTAMPTZ NOT NULL,
        due_date                TIMESTAMPTZ NOT NULL,
        resolved_at             TIMESTAMPTZ,
        CHECK (amount_repaid <= total_due)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS loans_by_user ON economy.loans (user_id, created_at)",
    "CREATE INDEX IF NOT EXISTS loans_by_due_date ON economy.loans (due_date) WHERE status = 'active'",
];

pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| EconomyError::Storage(format!("Failed to connect to PostgreSQL: {}", e)))?;

        info!(max_connections = max_connections, "Connected to PostgreSQL");

        Ok(Self { pool })
    }

    /// Creates the `economy` schema. With `single_active_loan`, a partial
    /// unique index backs the one-active-loan rule.
    pub async fn init_schema(&self, single_active_loan: bool) -> Result<()> {
        info!("Initializing database schema...");

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| EconomyError::Storage(format!("Failed to initialize schema: {}", e)))?;
        }

        if single_active_loan {
            let statement = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {ONE_ACTIVE_LOAN_INDEX} \
                 ON economy.loans (user_id) WHERE status = 'active'"
            );
            sqlx::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| EconomyError::Storage(format!("Failed to create loan index: {}", e)))?;
        } else {
            let statement = format!("DROP INDEX IF EXISTS economy.{ONE_ACTIVE_LOAN_INDEX}");
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        info!("Database schema initialized");
        Ok(())
    }

    /// Ledger store backed by this pool.
    pub fn ledger(&self) -> PgLedger {
        PgLedger::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
