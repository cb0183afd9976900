//! Provider creation and utility functions.

use std::path::PathBuf;
use std::sync::Arc;

use tether::{
    SessionProvider,
    provider::{InMemoryProvider, sql::SqlxProvider},
};

use crate::cli::{Backend, BackendArgs};

/// Node name the CLI registers under unless told otherwise.
pub const CLI_NODE: &str = "tether-cli";

/// Redact credentials from a PostgreSQL connection URL for safe logging
pub fn redact_postgres_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut redacted = parsed.clone();
        if !parsed.username().is_empty() {
            let _ = redacted.set_username("***");
        }
        if parsed.password().is_some() {
            let _ = redacted.set_password(Some("***"));
        }
        redacted.to_string()
    } else {
        "postgres://***@<unparsable-url>".to_string()
    }
}

/// Human-readable description of the configured backend
pub fn backend_label(args: &BackendArgs) -> String {
    match args.backend {
        Backend::Sqlite => format!("sqlite ({})", sqlite_path(args).display()),
        Backend::Postgres => match &args.postgres_url {
            Some(url) => format!("postgres ({})", redact_postgres_url(url)),
            None => "postgres".to_string(),
        },
        Backend::Inmemory => "inmemory".to_string(),
    }
}

fn sqlite_path(args: &BackendArgs) -> PathBuf {
    args.data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether.db")
}

/// Create the appropriate provider based on configuration
pub async fn create_provider(
    args: &BackendArgs,
) -> Result<Arc<dyn SessionProvider>, Box<dyn std::error::Error>> {
    let node = args.node.as_str();

    match args.backend {
        Backend::Sqlite => {
            if let Some(dir) = &args.data_dir {
                tokio::fs::create_dir_all(dir).await?;
            }
            let db_path = sqlite_path(args);
            tracing::info!("Using SQLite sessions at {}", db_path.display());
            Ok(Arc::new(SqlxProvider::open_sqlite(&db_path, node).await?))
        }
        Backend::Postgres => {
            let url = args
                .postgres_url
                .as_ref()
                .ok_or("PostgreSQL backend requires --postgres-url or TETHER_POSTGRES_URL")?;

            let display_url = redact_postgres_url(url);
            tracing::info!("Connecting to PostgreSQL sessions at {}", display_url);

            match SqlxProvider::connect_postgres(url, node).await {
                Ok(provider) => {
                    tracing::info!("Connected to PostgreSQL successfully");
                    Ok(Arc::new(provider))
                }
                Err(e) => {
                    Err(format!("Failed to connect to PostgreSQL at {display_url}: {e}").into())
                }
            }
        }
        Backend::Inmemory => {
            tracing::info!("Using ephemeral in-memory sessions");
            Ok(Arc::new(InMemoryProvider::new(node)))
        }
    }
}
