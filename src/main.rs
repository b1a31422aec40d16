//! Reelpass binary entry point

use reelpass::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Start HTTP server
/// 6. Start background tasks (ledger audit)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let log_format =
        std::env::var("REELPASS__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "reelpass=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "reelpass=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Reelpass...");

    reelpass::metrics::init_metrics();

    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        database = %config.database.path.display(),
        "Configuration loaded"
    );

    let state = AppState::new(config.clone()).await?;
    let app = reelpass::build_router(state.clone());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    if config.ledger.audit_interval_seconds > 0 {
        spawn_ledger_audit_task(state.clone());
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn the read-only ledger reconciliation audit
fn spawn_ledger_audit_task(state: AppState) {
    tokio::spawn(async move {
        let interval_secs = state.config.ledger.audit_interval_seconds;
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            tracing::debug!("Running scheduled ledger audit...");
            match state.wallet.reconcile_all().await {
                Ok(mismatches) if mismatches.is_empty() => {
                    tracing::info!("Ledger audit completed: all wallets reconcile");
                }
                Ok(mismatches) => {
                    tracing::error!(
                        wallets = mismatches.len(),
                        "Ledger audit found unreconciled wallets"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Ledger audit failed");
                }
            }
        }
    });

    tracing::info!("Ledger audit task spawned");
}
