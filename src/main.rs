//! Parimutuel pool engine service
//!
//! Main entry point. Runs:
//! - the pool scheduler (creation, status, resolution and cleanup sweeps)
//! - a WebSocket server fanning out pool lifecycle events

use anyhow::Context;
use parimutuel_engine::clock::SystemClock;
use parimutuel_engine::config::StoreBackend;
use parimutuel_engine::database::{create_pool, run_migrations};
use parimutuel_engine::ledger::SolanaLedgerVerifier;
use parimutuel_engine::oracle::{PacificaOracle, PriceOracle};
use parimutuel_engine::repositories::{MemoryPoolStore, PgPoolStore, PoolStore};
use parimutuel_engine::solana_client::{ProgramAccounts, SettlementGateway, SolanaSettlementClient};
use parimutuel_engine::websocket::WebSocketServer;
use parimutuel_engine::{AppConfig, AppError, AppState, EngineDeps};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "parimutuel_engine={},sqlx=warn,tower=warn",
            config.log_level
        )
        .into()
    });

    if config.json_logs() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    init_tracing(&config);

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Parimutuel Pool Engine Starting                ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("Pool templates: {}", config.scheduler.templates.len());

    // =========================================================================
    // POOL STORE
    // =========================================================================
    let store: Arc<dyn PoolStore> = match config.store_backend {
        StoreBackend::Postgres => {
            info!("Connecting to database...");
            let pool = create_pool(&config.database)
                .await
                .context("Failed to create database pool")?;
            info!("Max connections: {}", config.database.max_connections);

            info!("Running database migrations...");
            run_migrations(&pool)
                .await
                .context("Database migration failed")?;
            info!("✓ Postgres pool store ready");

            Arc::new(PgPoolStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using in-memory pool store - state is lost on restart");
            Arc::new(MemoryPoolStore::new())
        }
    };

    // =========================================================================
    // EXTERNAL CLIENTS
    // =========================================================================
    info!("Initializing external clients...");

    let oracle = Arc::new(PacificaOracle::new(&config.oracle).context("Failed to build price oracle")?);
    if oracle.is_healthy().await {
        info!("✓ Price oracle reachable: {}", config.oracle.base_url);
    } else {
        warn!("Price oracle not reachable yet: {}", config.oracle.base_url);
    }

    let ledger = Arc::new(SolanaLedgerVerifier::new(&config.solana));
    info!("✓ Ledger verifier initialized ({})", config.solana.rpc_url);

    let gateway = Arc::new(
        SolanaSettlementClient::with_config(&config.solana).context("Failed to build Solana client")?,
    );
    match gateway.authority() {
        Some(authority) => info!("✓ Solana client initialized, authority {}", authority),
        None => warn!("No AUTHORITY_SECRET_KEY - on-chain calls simulated, server claims disabled"),
    }

    let accounts = ProgramAccounts::from_config(&config.solana).context("Invalid program configuration")?;

    let ws_server = Arc::new(WebSocketServer::new());
    info!("✓ WebSocket notifier initialized");

    // =========================================================================
    // CORE SERVICES
    // =========================================================================
    let deps = EngineDeps {
        store,
        oracle,
        ledger,
        gateway,
        notifier: ws_server.clone(),
        clock: Arc::new(SystemClock),
        accounts,
    };

    let mut app_state = AppState::new(&config, deps);
    info!("✓ Settlement engine and reconcilers initialized");

    if config.scheduler.enabled {
        let jobs = app_state.scheduler.start();
        info!("✓ Pool scheduler started ({} jobs)", jobs);
    } else {
        warn!("SCHEDULER_ENABLED=false - pools will not advance");
    }

    // =========================================================================
    // WEBSOCKET SERVER
    // =========================================================================
    let ws_handle = if let Some(ws_port) = config.ws_port {
        let ws_addr: SocketAddr = format!("0.0.0.0:{}", ws_port)
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid WebSocket address: {}", e)))?;

        let listener = TcpListener::bind(ws_addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket server on {}", ws_addr))?;

        let ws_server_clone = ws_server.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from {}", addr);
                        let ws = ws_server_clone.clone();
                        tokio::spawn(async move {
                            if let Err(e) = ws.handle_connection(stream).await {
                                error!("WebSocket connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("WebSocket accept error: {}", e);
                    }
                }
            }
        });

        info!("✓ WebSocket server started on {}", ws_addr);
        Some(handle)
    } else {
        warn!("WS_PORT not configured - WebSocket server not started");
        None
    };

    // =========================================================================
    // READY
    // =========================================================================
    let status = app_state.scheduler.status();
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           Parimutuel Pool Engine Ready!                  ║");
    info!("╠══════════════════════════════════════════════════════════╣");
    if let Some(ws_port) = config.ws_port {
        info!("║  WebSocket:    0.0.0.0:{}", ws_port);
    }
    info!("║  Scheduler:    running={} jobs={}", status.is_running, status.job_count);
    info!("║  Environment:  {}", config.environment);
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = async {
            if let Some(handle) = ws_handle {
                handle.await.ok();
            } else {
                // Never completes if WebSocket is not running
                futures::future::pending::<()>().await;
            }
        } => {
            error!("WebSocket server exited unexpectedly");
        }
    }

    app_state.scheduler.stop().await;

    info!("Parimutuel pool engine shutdown complete");
    Ok(())
}
