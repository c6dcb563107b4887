/// Server setup and initialization
///
/// Wires together all components: workspace storage, definition registry,
/// ledger engine, execution engine, approval gateway, resume sweeper and the
/// HTTP routes. Every engine object is constructed exactly once here and
/// shared by reference; there are no process-wide singletons.

use crate::{
    api::{
        approvals::create_approval_routes, definitions::create_definition_routes,
        executions::create_execution_routes, ledger::create_ledger_routes,
        workspaces::create_workspace_routes, AppState,
    },
    config::Config,
    hitl::ApprovalGateway,
    ledger::LedgerEngine,
    runtime::{ExecutionEngine, ResumeSweeper, StepExecutor},
    workflow::{ContextStore, DefinitionRegistry, DefinitionStorage},
    workspace::{WorkspaceCatalog, WorkspaceDatabaseManager},
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Create the main Axum application with all routes
///
/// Initializes all components and wires them together into a complete
/// application, including the background approval sweeper.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🏗️ Initializing workspace database manager");
    let manager = Arc::new(WorkspaceDatabaseManager::new(config.database.data_dir.clone()));

    tracing::info!("📋 Initializing control database (definitions + catalog)");
    let control_pool = manager.control_pool().await?;
    let catalog = WorkspaceCatalog::new(control_pool.clone());
    let storage = DefinitionStorage::new(control_pool);

    tracing::info!("📊 Initializing definition registry");
    let registry = Arc::new(DefinitionRegistry::new(storage.clone()));
    registry.init_from_storage().await?;

    tracing::info!("💰 Initializing ledger engine");
    let ledger = LedgerEngine::new(Arc::clone(&manager));

    tracing::info!("⚙️ Initializing step executor");
    let executor = StepExecutor::new(ledger.clone(), config.actions.clone())?;

    tracing::info!("🚀 Initializing execution engine");
    let contexts = ContextStore::new(Arc::clone(&manager));
    let gateway = ApprovalGateway::new(Arc::clone(&manager));
    let engine = Arc::new(ExecutionEngine::new(
        Arc::clone(&registry),
        contexts.clone(),
        gateway.clone(),
        Arc::new(executor),
    ));

    tracing::info!("⏰ Initializing approval resume sweeper");
    let sweeper = Arc::new(
        ResumeSweeper::new(Arc::clone(&engine), gateway.clone(), catalog.clone()).await?,
    );
    sweeper.start().await?;

    let app_state = AppState {
        manager,
        catalog,
        storage,
        registry,
        contexts,
        gateway,
        ledger,
        engine,
        sweeper,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workspace provisioning
        .merge(create_workspace_routes())
        // Definition management
        .merge(create_definition_routes())
        // Execution lifecycle
        .merge(create_execution_routes())
        // Human-in-the-loop surface
        .merge(create_approval_routes())
        // Ledger surface
        .merge(create_ledger_routes())
        .with_state(app_state);

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Ledgerflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
