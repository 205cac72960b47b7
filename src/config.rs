use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::credit::CreditPolicy;
use crate::ledger::RetryPolicy;
use crate::loans::LoanPolicy;
use crate::rewards::RewardRules;

/// Configuration for the economy engine service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Base rewards per event type
    pub rewards: RewardRules,
    /// Credit scoring weights
    pub credit: CreditPolicy,
    /// Lending rules
    pub loans: LoanPolicy,
    /// Version-conflict retry bounds
    pub retry: RetryPolicy,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, uses the in-memory ledger)
    pub postgres_enabled: bool,
    /// Connection pool ceiling
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log every HTTP request and response
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Points worth one dollar when converting at read time
    pub points_per_dollar: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            postgres_url: "postgresql://localhost:5432/wellness_economy".to_string(),
            postgres_enabled: false,
            max_connections: 10,
        }
    }
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8780,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
            rewards: RewardRules::default(),
            credit: CreditPolicy::default(),
            loans: LoanPolicy::default(),
            retry: RetryPolicy::default(),
            wallet: WalletConfig {
                points_per_dollar: 1000,
            },
        }
    }
}

/// Overwrites `target` with the parsed value of `name` when it is set.
fn env_override<T>(name: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(name) {
        *target = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value: {}", name, raw))?;
    }
    Ok(())
}

/// Parses a comma-separated list of loan terms such as `7,14,30`.
fn parse_terms(raw: &str) -> Result<Vec<u32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| {
            term.parse::<u32>()
                .with_context(|| format!("Invalid loan term: {}", term))
        })
        .collect()
}

impl EconomyConfig {
    /// Load configuration from `ECON_*` environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server configuration
        if let Ok(host) = env::var("ECON_HOST") {
            config.server.host = host;
        }
        env_override("ECON_PORT", &mut config.server.port)?;

        // Database configuration
        if let Ok(url) = env::var("ECON_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        env_override("ECON_POSTGRES_ENABLED", &mut config.database.postgres_enabled)?;
        env_override("ECON_DB_MAX_CONNECTIONS", &mut config.database.max_connections)?;

        // Logging configuration
        if let Ok(level) = env::var("ECON_LOG_LEVEL") {
            config.logging.level = level;
        }
        env_override("ECON_LOG_REQUESTS", &mut config.logging.log_requests)?;

        // Reward rules
        let rules = &mut config.rewards;
        env_override("ECON_REWARD_POST_POINTS", &mut rules.post_points)?;
        env_override("ECON_REWARD_CHALLENGE_POINTS", &mut rules.challenge_points)?;
        env_override("ECON_REWARD_STREAK_POINTS_PER_DAY", &mut rules.streak_points_per_day)?;
        env_override("ECON_REWARD_STREAK_MAX_POINTS", &mut rules.streak_max_points)?;
        env_override("ECON_REWARD_BADGE_COINS", &mut rules.badge_coins)?;
        env_override("ECON_REWARD_TOP_COMMENT_COINS", &mut rules.top_comment_coins)?;
        env_override("ECON_REWARD_TOP_COMMENT_POINTS", &mut rules.top_comment_points)?;
        env_override("ECON_TOP_COMMENT_THRESHOLD", &mut rules.top_comment_like_threshold)?;
        env_override("ECON_REWARD_REFERRER_COINS", &mut rules.referrer_coins)?;
        env_override("ECON_REWARD_REFEREE_COINS", &mut rules.referee_coins)?;

        // Credit scoring
        let credit = &mut config.credit;
        env_override("ECON_CREDIT_BASE_SCORE", &mut credit.base_score)?;
        env_override("ECON_CREDIT_ON_TIME_BONUS", &mut credit.on_time_bonus)?;
        env_override("ECON_CREDIT_COMPLETION_BONUS", &mut credit.completion_bonus)?;
        env_override("ECON_CREDIT_LATE_PENALTY", &mut credit.late_penalty)?;

        // Lending rules
        if let Ok(terms) = env::var("ECON_LOAN_TERMS") {
            config.loans.allowed_terms = parse_terms(&terms)?;
        }
        env_override("ECON_LOAN_ALLOW_STACKING", &mut config.loans.allow_stacking)?;
        env_override("ECON_LOAN_RECOVER_ON_DEFAULT", &mut config.loans.recover_on_default)?;
        env_override("ECON_LOAN_SWEEP_INTERVAL_SECS", &mut config.loans.sweep_interval_secs)?;

        // Retry bounds
        env_override("ECON_RETRY_MAX_ATTEMPTS", &mut config.retry.max_attempts)?;
        env_override("ECON_RETRY_BASE_DELAY_MS", &mut config.retry.base_delay_ms)?;
        env_override("ECON_RETRY_MAX_DELAY_MS", &mut config.retry.max_delay_ms)?;

        env_override("ECON_POINTS_PER_DOLLAR", &mut config.wallet.points_per_dollar)?;

        if config.loans.allow_stacking {
            warn!("Loan stacking enabled: users may hold several active loans");
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.database.postgres_enabled && self.database.postgres_url.is_empty() {
            return Err(anyhow::anyhow!(
                "PostgreSQL is enabled but ECON_POSTGRES_URL is empty"
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("Database pool needs at least one connection"));
        }

        let rules = &self.rewards;
        let fixed_rewards = [
            ("post_points", rules.post_points),
            ("challenge_points", rules.challenge_points),
            ("streak_points_per_day", rules.streak_points_per_day),
            ("streak_max_points", rules.streak_max_points),
            ("badge_coins", rules.badge_coins),
            ("top_comment_coins", rules.top_comment_coins),
            ("top_comment_points", rules.top_comment_points),
            ("referrer_coins", rules.referrer_coins),
            ("referee_coins", rules.referee_coins),
        ];
        if let Some((name, value)) = fixed_rewards.iter().find(|(_, value)| *value < 0) {
            return Err(anyhow::anyhow!("Reward {} cannot be negative: {}", name, value));
        }

        if rules.top_comment_like_threshold == 0 {
            return Err(anyhow::anyhow!("Top comment threshold must be at least one like"));
        }

        if self.loans.allowed_terms.is_empty() {
            return Err(anyhow::anyhow!("At least one loan term must be offered"));
        }

        if self.loans.allowed_terms.contains(&0) {
            return Err(anyhow::anyhow!("Loan terms must be at least one day"));
        }

        if self.loans.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("Default sweep interval must be non-zero"));
        }

        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("Retry policy needs at least one attempt"));
        }

        if self.wallet.points_per_dollar <= 0 {
            return Err(anyhow::anyhow!("Points per dollar must be positive"));
        }

        Ok(())
    }
}

/// Masks the password of a connection URL for logging
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };

    let credentials = &rest[..at];
    let masked = match credentials.find(':') {
        Some(colon) => format!("{}:***", &credentials[..colon]),
        None => credentials.to_string(),
    };
    format!("{}{}{}", &url[..scheme_end + 3], masked, &rest[at..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url() {
        assert_eq!(
            redact_url("postgresql://econ:hunter2@db:5432/economy"),
            "postgresql://econ:***@db:5432/economy"
        );
        assert_eq!(
            redact_url("postgresql://localhost:5432/economy"),
            "postgresql://localhost:5432/economy"
        );
        assert_eq!(redact_url("not a url"), "not a url");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = EconomyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.loans.allowed_terms, vec![7, 14, 30]);
        assert!(!config.loans.allow_stacking);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EconomyConfig::default();
        config.loans.allowed_terms.clear();
        assert!(config.validate().is_err());

        let mut config = EconomyConfig::default();
        config.rewards.referee_coins = -1;
        assert!(config.validate().is_err());

        let mut config = EconomyConfig::default();
        config.wallet.points_per_dollar = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_terms() {
        assert_eq!(parse_terms("7, 14,30").unwrap(), vec![7, 14, 30]);
        assert!(parse_terms("7,two").is_err());
    }
}
