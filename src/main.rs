/// Ledgerflow: confidence-gated back-office workflow automation
///
/// Main entry point for the Ledgerflow server. Initializes configuration and
/// starts the HTTP server with workflow, approval and ledger capabilities.

use ledgerflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workspace provisioning at /api/workspaces
/// - Definition management at /api/definitions/*
/// - Execution lifecycle at /api/workspaces/{ws}/executions/*
/// - Approval surface at /api/workspaces/{ws}/approvals/*
/// - Ledger surface at /api/workspaces/{ws}/ledger/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration (defaults to 0.0.0.0:3010 and SQLite under ./data)
    let config = Config::default();

    // Start the server
    start_server(config).await?;

    Ok(())
}
