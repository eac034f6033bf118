// Loan Desk - Web Server
// POST /ai/process-command with Axum

use anyhow::{Context, Result};
use loan_desk::api::{create_router, AppState};
use loan_desk::{shared_provider, AppConfig, CommandInterpreter, RetryPolicy, SqliteStore};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    loan_desk::config::load_dotenv();
    loan_desk::config::init_tracing("loan_desk=info,tower_http=info");

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Open database
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("cannot open {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), "database opened");

    // One provider client for the whole process
    let provider = shared_provider(&config).context("completion provider unavailable")?;

    let interpreter = CommandInterpreter::from_parts(
        provider,
        Arc::new(store),
        RetryPolicy::new().with_attempt_timeout(config.provider_timeout),
    );
    let app = create_router(AppState { interpreter });

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    info!(addr = %config.listen_addr, "🚀 server running");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
