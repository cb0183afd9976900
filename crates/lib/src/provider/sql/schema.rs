//! SQL schema definitions and migrations.
//!
//! The schema is portable between SQLite and PostgreSQL and deliberately
//! narrow: it stores sessions, the nodes that registered them and the id
//! sequence. Everything else about users and groups lives elsewhere.
//!
//! # Migration System
//!
//! Migrations are code-based rather than SQL files so each step can issue
//! dialect-specific statements.
//!
//! ## Adding a New Migration
//!
//! 1. Increment `SCHEMA_VERSION`
//! 2. Add a new `migrate_vN_to_vM` async function
//! 3. Add the migration to the match statement in `run_migration`

use crate::Result;
use crate::provider::ProviderError;

use super::{SEQUENCE_NAME, SqlxProvider, SqlxResultExt};

/// Current schema version.
///
/// Increment this when making schema changes that require migration.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL statements to create the schema tables.
///
/// BIGINT is used for every integer so SQLite and PostgreSQL agree on width.
pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version BIGINT PRIMARY KEY
    )",
    // Server processes that register sessions
    "CREATE TABLE IF NOT EXISTS nodes (
        uuid TEXT PRIMARY KEY NOT NULL,
        registered BIGINT NOT NULL,
        active BIGINT NOT NULL DEFAULT 1
    )",
    // Times are epoch milliseconds; closed is NULL while the session is open
    "CREATE TABLE IF NOT EXISTS sessions (
        id BIGINT PRIMARY KEY,
        uuid TEXT NOT NULL UNIQUE,
        owner_id BIGINT,
        sudoer_id BIGINT,
        node TEXT,
        started BIGINT NOT NULL,
        closed BIGINT,
        time_to_live BIGINT NOT NULL DEFAULT 0,
        time_to_idle BIGINT NOT NULL DEFAULT 0,
        default_event_type TEXT NOT NULL,
        user_agent TEXT,
        user_ip TEXT
    )",
    // Named counters; next_val is the last value handed out
    "CREATE TABLE IF NOT EXISTS session_sequence (
        name TEXT PRIMARY KEY NOT NULL,
        next_val BIGINT NOT NULL
    )",
];

/// SQL statements to create indexes.
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_sessions_closed ON sessions(closed)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_owner ON sessions(owner_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_node ON sessions(node)",
];

/// Initialize the database schema.
///
/// Creates tables, indexes and the session sequence if they don't exist, and
/// handles migrations if the schema version has changed.
pub async fn initialize(provider: &SqlxProvider) -> Result<()> {
    let pool = provider.pool();

    for statement in CREATE_TABLES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .sql_context(&format!("Schema creation failed - SQL: {statement}"))?;
    }

    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version")
        .fetch_optional(pool)
        .await
        .sql_context("Failed to check schema version")?;

    if row.is_none() {
        sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await
            .sql_context("Failed to initialize schema version")?;
    } else if let Some((current_version,)) = row
        && current_version < SCHEMA_VERSION
    {
        migrate(provider, current_version, SCHEMA_VERSION).await?;
    }

    for statement in CREATE_INDEXES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .sql_context(&format!("Index creation failed - SQL: {statement}"))?;
    }

    let seed = if provider.is_sqlite() {
        "INSERT OR IGNORE INTO session_sequence (name, next_val) VALUES ($1, 0)"
    } else {
        "INSERT INTO session_sequence (name, next_val) VALUES ($1, 0)
         ON CONFLICT (name) DO NOTHING"
    };
    sqlx::query(seed)
        .bind(SEQUENCE_NAME)
        .execute(pool)
        .await
        .sql_context("Failed to seed session sequence")?;

    Ok(())
}

/// Run migrations sequentially from one schema version to another.
async fn migrate(provider: &SqlxProvider, from: i64, to: i64) -> Result<()> {
    tracing::info!(from, to, "Starting SQL schema migration");

    let mut current = from;
    while current < to {
        let next = current + 1;
        tracing::info!(from = current, to = next, "Running migration");

        run_migration(provider, current, next).await?;

        sqlx::query("UPDATE schema_version SET version = $1")
            .bind(next)
            .execute(provider.pool())
            .await
            .sql_context(&format!("Failed to update schema version to {next}"))?;

        tracing::info!(version = next, "Migration completed");
        current = next;
    }

    Ok(())
}

/// Execute a single migration step.
async fn run_migration(provider: &SqlxProvider, from: i64, to: i64) -> Result<()> {
    // No migrations exist yet; add `match from { 1 => migrate_v1_to_v2(provider).await, .. }`.
    let _ = provider;

    Err(ProviderError::SqlxError {
        reason: format!(
            "Unknown migration path: v{from} to v{to}. \
             SCHEMA_VERSION was incremented without adding a migration."
        ),
        source: None,
    }
    .into())
}
