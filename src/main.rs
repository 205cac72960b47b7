use anyhow::{Context, Result};
use axum::{Router, middleware, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use wellness_economy::{
    ChannelNotifier, DatabasePool, EconomyConfig, EconomyEngine, EconomyStore, InMemoryLedger,
    LogNotifier, Notifier,
    api::{
        EconomyApiState, RequestLogging, create_economy_router, logging_middleware,
        security_headers_middleware,
    },
    config::redact_url,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first - invalid settings stop startup
    let config = EconomyConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check ECON_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting wellness economy engine");

    let store = init_store(&config).await?;

    // Notifications are queued and delivered off the request path
    let (notifier, mut outbox) = ChannelNotifier::channel();
    tokio::spawn(async move {
        let delivery = LogNotifier;
        while let Some(notification) = outbox.recv().await {
            if let Err(e) = delivery.notify(notification) {
                warn!("Notification delivery failed: {}", e);
            }
        }
    });

    let engine = Arc::new(EconomyEngine::new(store, &config, Arc::new(notifier)));
    info!(
        "Loan policy: terms={:?}, stacking={}, recover_on_default={}",
        config.loans.allowed_terms, config.loans.allow_stacking, config.loans.recover_on_default
    );

    spawn_default_sweeper(engine.clone(), config.loans.sweep_interval_secs);

    let app = Router::new()
        .nest(
            "/economy",
            create_economy_router(EconomyApiState {
                engine: engine.clone(),
            }),
        )
        // Health check
        .route("/health", get(|| async { "OK" }))
        .layer(middleware::from_fn_with_state(
            RequestLogging {
                enabled: config.logging.log_requests,
            },
            logging_middleware,
        ))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Economy server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_logging(config: &EconomyConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// PostgreSQL when enabled, otherwise the in-memory ledger. An enabled but
/// unreachable database stops startup.
async fn init_store(config: &EconomyConfig) -> Result<Arc<dyn EconomyStore>> {
    if !config.database.postgres_enabled {
        info!("PostgreSQL disabled, using in-memory ledger");
        return Ok(Arc::new(InMemoryLedger::new()));
    }

    let url = redact_url(&config.database.postgres_url);
    info!("Connecting to PostgreSQL at {}", url);

    let pool = DatabasePool::new(&config.database.postgres_url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to connect to PostgreSQL at {url}"))?;
    pool.init_schema(!config.loans.allow_stacking)
        .await
        .context("Failed to initialize the economy schema")?;

    info!("PostgreSQL ledger ready");
    Ok(Arc::new(pool.ledger()))
}

/// Moves overdue loans to defaulted on a fixed interval.
fn spawn_default_sweeper(engine: Arc<EconomyEngine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match engine.sweep_defaults(chrono::Utc::now()).await {
                Ok(defaulted) if !defaulted.is_empty() => {
                    info!("Default sweep: {} loans defaulted", defaulted.len());
                }
                Ok(_) => {}
                Err(e) => error!("Default sweep failed: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_postgres_stops_startup() {
        let mut config = EconomyConfig::default();
        config.database.postgres_enabled = true;
        config.database.postgres_url = "not-a-postgres-url".to_string();

        let err = init_store(&config).await.err().expect("startup must fail");
        assert!(err.to_string().contains("Failed to connect to PostgreSQL"));
    }

    #[tokio::test]
    async fn test_disabled_postgres_uses_memory() {
        let mut config = EconomyConfig::default();
        config.database.postgres_enabled = false;

        assert!(init_store(&config).await.is_ok());
    }
}
