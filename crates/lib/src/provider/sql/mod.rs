//! SQL-backed session storage.
//!
//! [`SqlxProvider`] implements [`SessionProvider`] over sqlx's `AnyPool`, so
//! one implementation serves both dialects:
//!
//! - **SQLite** (feature: `sqlite`): embedded database
//! - **PostgreSQL** (feature: `postgres`): PostgreSQL database
//!
//! Every mutating operation runs in a transaction. Session ids come from the
//! `session_sequence` table and are strictly positive, so they never collide
//! with in-memory ids.
//!
//! The schema is created on connect; see [`schema`] for the layout and the
//! migration hooks.

mod storage;

/// Schema definition and migration system.
pub mod schema;

use std::any::Any;
use std::sync::Arc;
#[cfg(feature = "postgres")]
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
#[cfg(feature = "postgres")]
use sqlx::Executor;
use sqlx::any::AnyPoolOptions;

use super::{ProviderError, SessionProvider, internal_record};
use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::constants::ROOT_USER_ID;
use crate::session::SessionRecord;

/// Row in `session_sequence` that numbers sessions.
pub(crate) const SEQUENCE_NAME: &str = "session";

/// Extension trait for sqlx Result types to simplify error handling.
///
/// Similar to `anyhow::Context`, this trait adds a method to convert
/// sqlx errors to `ProviderError::SqlxError` with a context message.
pub(crate) trait SqlxResultExt<T> {
    /// Convert sqlx error to ProviderError with context message.
    fn sql_context(self, context: &str) -> Result<T>;
}

impl<T> SqlxResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn sql_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            ProviderError::SqlxError {
                reason: format!("{context}: {e}"),
                source: Some(e),
            }
            .into()
        })
    }
}

/// Database kind for SQL dialect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    /// SQLite database
    Sqlite,
    /// PostgreSQL database
    Postgres,
}

/// Durable [`SessionProvider`] using sqlx.
///
/// The provider registers its node in the `nodes` table on connect and stamps
/// that node on every session it stores.
///
/// # Test Isolation
///
/// For PostgreSQL, each provider instance can use its own schema.
/// Use `connect_postgres_isolated()` to create an isolated provider for testing.
pub struct SqlxProvider {
    pool: AnyPool,
    kind: DbKind,
    node: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SqlxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxProvider")
            .field("kind", &self.kind)
            .field("node", &self.node)
            .finish()
    }
}

impl SqlxProvider {
    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Get the database kind.
    pub fn kind(&self) -> DbKind {
        self.kind
    }

    /// Check if this provider is using SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.kind == DbKind::Sqlite
    }

    /// Check if this provider is using PostgreSQL.
    pub fn is_postgres(&self) -> bool {
        self.kind == DbKind::Postgres
    }

    /// The node this provider registers sessions under.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Use `clock` to stamp closing times and node registration.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Create the schema and register this node.
    async fn prepare(pool: AnyPool, kind: DbKind, node: String) -> Result<Self> {
        let provider = Self {
            pool,
            kind,
            node,
            clock: Arc::new(SystemClock),
        };
        schema::initialize(&provider).await?;
        storage::register_node(&provider).await?;
        Ok(provider)
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// SQLite-specific implementations
#[cfg(feature = "sqlite")]
impl SqlxProvider {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the database file and schema if they don't exist.
    pub async fn open_sqlite<P: AsRef<std::path::Path>>(path: P, node: &str) -> Result<Self> {
        // mode=rwc: read-write-create (create file if it doesn't exist)
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        Self::connect_sqlite(&url, node).await
    }

    /// Connect to a SQLite database using a connection URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite:./sessions.db")
    /// * `node` - Uuid of the node registering sessions
    pub async fn connect_sqlite(url: &str, node: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let is_in_memory = url.contains("mode=memory");

        // An in-memory database disappears with its last connection, so keep one open.
        let pool = if is_in_memory {
            AnyPoolOptions::new()
                .max_connections(5)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(url)
                .await
                .sql_context("Failed to connect to SQLite")?
        } else {
            AnyPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .sql_context("Failed to connect to SQLite")?
        };

        if is_in_memory {
            sqlx::query("PRAGMA busy_timeout = 5000;")
                .execute(&pool)
                .await
                .sql_context("Failed to configure SQLite")?;
        } else {
            sqlx::query(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
            .execute(&pool)
            .await
            .sql_context("Failed to configure SQLite")?;
        }

        Self::prepare(pool, DbKind::Sqlite, node.to_string()).await
    }

    /// Create an in-memory SQLite database.
    ///
    /// The database exists only for the lifetime of this provider. Each call
    /// gets its own database.
    pub async fn sqlite_in_memory(node: &str) -> Result<Self> {
        // Shared cache so every pooled connection sees the same database.
        let unique_id = uuid::Uuid::new_v4();
        let url = format!("sqlite:file:mem_{unique_id}?mode=memory&cache=shared");
        Self::connect_sqlite(&url, node).await
    }
}

// PostgreSQL-specific implementations
#[cfg(feature = "postgres")]
impl SqlxProvider {
    /// Connect to a PostgreSQL database using a connection URL.
    ///
    /// This connects to the default (public) schema. For test isolation,
    /// use `connect_postgres_isolated()` instead.
    pub async fn connect_postgres(url: &str, node: &str) -> Result<Self> {
        Self::connect_postgres_with_schema(url, node, None).await
    }

    /// Connect to PostgreSQL, optionally inside a dedicated schema.
    async fn connect_postgres_with_schema(
        url: &str,
        node: &str,
        schema_name: Option<String>,
    ) -> Result<Self> {
        sqlx::any::install_default_drivers();

        if let Some(ref schema) = schema_name {
            let temp_pool = AnyPoolOptions::new()
                .max_connections(1)
                .connect(url)
                .await
                .sql_context("Failed to connect to PostgreSQL")?;

            let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {schema}");
            sqlx::query(&create_schema)
                .execute(&temp_pool)
                .await
                .sql_context(&format!("Failed to create schema {schema}"))?;

            temp_pool.close().await;
        }

        let schema_for_hook = schema_name.clone();
        let mut pool_options = AnyPoolOptions::new();
        if schema_name.is_some() {
            // Isolated test pools stay small so parallel tests don't exhaust max_connections.
            pool_options = pool_options
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(30));
        } else {
            pool_options = pool_options.max_connections(5);
        }

        let pool = pool_options
            .after_connect(move |conn, _meta| {
                let schema = schema_for_hook.clone();
                Box::pin(async move {
                    if let Some(ref s) = schema {
                        let set_path = format!("SET search_path TO {s}");
                        conn.execute(set_path.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(url)
            .await
            .sql_context("Failed to connect to PostgreSQL")?;

        Self::prepare(pool, DbKind::Postgres, node.to_string()).await
    }

    /// Connect to a PostgreSQL database inside a fresh, uniquely named schema.
    pub async fn connect_postgres_isolated(url: &str, node: &str) -> Result<Self> {
        // Schema names must start with a letter and be lowercase.
        let unique_id = uuid::Uuid::new_v4().simple().to_string();
        let schema_name = format!("test_{unique_id}");
        Self::connect_postgres_with_schema(url, node, Some(schema_name)).await
    }
}

#[async_trait]
impl SessionProvider for SqlxProvider {
    fn name(&self) -> &str {
        match self.kind {
            DbKind::Sqlite => "sqlite",
            DbKind::Postgres => "postgres",
        }
    }

    async fn execute_update(
        &self,
        record: SessionRecord,
        user_id: i64,
        sudoer_id: Option<i64>,
    ) -> Result<SessionRecord> {
        storage::upsert_session(self, record, user_id, sudoer_id).await
    }

    async fn execute_close_session(&self, uuid: &str) -> Result<bool> {
        storage::close_session(self, uuid).await
    }

    async fn execute_internal_session(
        &self,
        uuid: &str,
        seed: SessionRecord,
    ) -> Result<SessionRecord> {
        storage::upsert_session(self, internal_record(uuid, seed), ROOT_USER_ID, None).await
    }

    async fn execute_next_session_id(&self) -> Result<i64> {
        storage::next_session_id(self).await
    }

    async fn find_session_by_id(&self, id: i64) -> Result<Option<SessionRecord>> {
        storage::find_by_id(self, id).await
    }

    async fn find_session_by_uuid(&self, uuid: &str) -> Result<Option<SessionRecord>> {
        storage::find_by_uuid(self, uuid).await
    }

    async fn find_session_id_by_uuid(&self, uuid: &str) -> Result<Option<i64>> {
        storage::find_id_by_uuid(self, uuid).await
    }

    async fn list_open_sessions(&self) -> Result<Vec<SessionRecord>> {
        storage::list_open(self).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(feature = "sqlite")]
/// Convenience type alias for the SQLite provider.
pub type Sqlite = SqlxProvider;

#[cfg(feature = "postgres")]
/// Convenience type alias for the PostgreSQL provider.
pub type Postgres = SqlxProvider;
