//! ACB ledger engine — HTTP entry point.
//!
//! Wires the concrete persistence backend (in-memory or SQLite, per
//! config), the FX collaborator and the mutation coordinator into an axum
//! router and serves it. All engine logic lives in the library crate; this
//! binary only does process-level plumbing.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use acb_ledger_backend::config::{Config, StoreBackend};
use acb_ledger_backend::coordinator::MutationCoordinator;
use acb_ledger_backend::fx::FixedTableFxProvider;
use acb_ledger_backend::store::{
    AccountCatalog, EventStore, MemoryAccountCatalog, MemoryEventStore, MemorySecurityCatalog,
    SecurityCatalog, SqliteAccountCatalog, SqliteBackend, SqliteEventStore, SqliteSecurityCatalog,
};
use acb_ledger_backend::{api, fx::FxProvider};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!(port = config.port, backend = ?config.store_backend, "starting acb ledger engine");

    let (events, securities, accounts): (
        Arc<dyn EventStore>,
        Arc<dyn SecurityCatalog>,
        Arc<dyn AccountCatalog>,
    ) = match config.store_backend {
        StoreBackend::Memory => (
            Arc::new(MemoryEventStore::new()),
            Arc::new(MemorySecurityCatalog::new()),
            Arc::new(MemoryAccountCatalog::new()),
        ),
        StoreBackend::Sqlite => {
            let backend = Arc::new(
                SqliteBackend::open(&config.database_path)
                    .context("failed to open acb ledger database")?,
            );
            (
                Arc::new(SqliteEventStore::new(backend.clone())),
                Arc::new(SqliteSecurityCatalog::new(backend.clone())),
                Arc::new(SqliteAccountCatalog::new(backend)),
            )
        }
    };

    let fx: Arc<dyn FxProvider> = Arc::new(FixedTableFxProvider::default());
    let coordinator = Arc::new(
        MutationCoordinator::new(events, securities, accounts, fx)
            .with_slice_lock_timeout(std::time::Duration::from_secs(config.slice_lock_timeout_secs)),
    );

    let app = api::router(coordinator)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("bind listener")?;
    info!(%addr, "acb ledger engine listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "acb_ledger_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
