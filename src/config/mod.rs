/// Configuration management for the Ledgerflow engine
///
/// Handles server configuration, database locations, and the adapter
/// endpoints consumed by step actions.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// External adapter endpoints used by step actions
    pub actions: ActionConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration for workspace-isolated storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Base directory for all workspace databases (default: "data")
    /// Creates: {workspace}/workspace.db per workspace, plus registry.db
    pub data_dir: String,
}

/// Endpoints for the external adapters consumed by step actions
///
/// Document extraction and agent execution are external collaborators; the
/// engine only knows their HTTP boundary. Unset endpoints make the
/// corresponding step types fail with ExternalActionFailure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Document extraction service (OCR/field extraction adapter)
    pub extractor_url: Option<String>,
    /// Sub-agent runner service
    pub agent_url: Option<String>,
    /// Timeout for outbound adapter calls, in seconds
    pub http_timeout_secs: u64,
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("LEDGERFLOW_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("LEDGERFLOW_PORT")
                    .unwrap_or_else(|_| "3010".to_string())
                    .parse()
                    .unwrap_or(3010),
            },
            database: DatabaseConfig {
                data_dir: std::env::var("LEDGERFLOW_DATA_DIR")
                    .unwrap_or_else(|_| "data".to_string()),
            },
            actions: ActionConfig {
                extractor_url: std::env::var("LEDGERFLOW_EXTRACTOR_URL").ok(),
                agent_url: std::env::var("LEDGERFLOW_AGENT_URL").ok(),
                http_timeout_secs: std::env::var("LEDGERFLOW_HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            },
        }
    }
}
