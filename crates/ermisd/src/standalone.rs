//! Standalone mode: the alias database on local disk, every other system
//! in memory.

use std::net::SocketAddr;
use std::sync::Arc;

use ermis_core::config::ErmisConfig;
use ermis_saga::Orchestrator;
use ermis_saga::memory::{MemoryDns, MemoryMailer, MemoryVault};
use ermis_state::StateStore;
use tracing::{info, warn};

/// Wire the orchestrator over `store` and in-memory gateways.
pub fn orchestrator(store: StateStore, config: ErmisConfig) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        Arc::new(store),
        Arc::new(MemoryDns::new()),
        Arc::new(MemoryVault::new()),
        Arc::new(MemoryMailer::new()),
        config,
    ))
}

pub async fn run(config: ErmisConfig) -> anyhow::Result<()> {
    info!("Ermis daemon starting in standalone mode");
    warn!("DNS, vault and mail gateways are in memory; their state is lost on exit");

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join("ermis.redb");

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "alias database opened");

    let port = config.server.port;
    info!(
        domain = %config.dns.domain_suffix,
        admins = config.auth.admins.len(),
        "orchestrator initialized"
    );
    let router = ermis_api::build_router(orchestrator(store, config));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Ermis daemon stopped");
    Ok(())
}
