//! Session storage operations for the SQL provider.

use sqlx::Row;
use sqlx::any::AnyRow;
use tracing::{debug, warn};

use crate::Result;
use crate::provider::ProviderError;
use crate::session::SessionRecord;

use super::{SEQUENCE_NAME, SqlxProvider, SqlxResultExt};

/// Sessions joined with the node that registered them.
const SELECT_SESSION: &str = "SELECT s.id, s.uuid, s.owner_id, s.sudoer_id, n.uuid AS node,
        s.started, s.closed, s.time_to_live, s.time_to_idle,
        s.default_event_type, s.user_agent, s.user_ip
     FROM sessions s
     LEFT JOIN nodes n ON n.uuid = s.node";

type Tx<'a> = sqlx::Transaction<'a, sqlx::Any>;

fn to_db(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn record_from_row(row: &AnyRow) -> Result<SessionRecord> {
    let decode = |e: sqlx::Error| ProviderError::SqlxError {
        reason: format!("Failed to decode session row: {e}"),
        source: Some(e),
    };
    Ok(SessionRecord {
        id: Some(row.try_get::<i64, _>("id").map_err(decode)?),
        uuid: row.try_get("uuid").map_err(decode)?,
        owner_id: row.try_get("owner_id").map_err(decode)?,
        sudoer_id: row.try_get("sudoer_id").map_err(decode)?,
        node: row.try_get("node").map_err(decode)?,
        started: from_db(row.try_get("started").map_err(decode)?),
        closed: row
            .try_get::<Option<i64>, _>("closed")
            .map_err(decode)?
            .map(from_db),
        time_to_live: from_db(row.try_get("time_to_live").map_err(decode)?),
        time_to_idle: from_db(row.try_get("time_to_idle").map_err(decode)?),
        default_event_type: row.try_get("default_event_type").map_err(decode)?,
        user_agent: row.try_get("user_agent").map_err(decode)?,
        user_ip: row.try_get("user_ip").map_err(decode)?,
    })
}

/// Record this provider's node, reactivating it if it was registered before.
pub async fn register_node(provider: &SqlxProvider) -> Result<()> {
    // Upsert syntax is shared by SQLite (3.24+) and PostgreSQL.
    sqlx::query(
        "INSERT INTO nodes (uuid, registered, active) VALUES ($1, $2, 1)
         ON CONFLICT (uuid) DO UPDATE SET active = 1",
    )
        .bind(provider.node())
        .bind(to_db(provider.clock.now_millis()))
        .execute(provider.pool())
        .await
        .sql_context("Failed to register node")?;
    debug!(node = provider.node(), "Registered session node");
    Ok(())
}

/// Advance the sequence inside `tx` and return the new value.
async fn next_id_in(tx: &mut Tx<'_>) -> Result<i64> {
    sqlx::query("UPDATE session_sequence SET next_val = next_val + 1 WHERE name = $1")
        .bind(SEQUENCE_NAME)
        .execute(&mut **tx)
        .await
        .sql_context("Failed to advance session sequence")?;

    let (id,): (i64,) = sqlx::query_as("SELECT next_val FROM session_sequence WHERE name = $1")
        .bind(SEQUENCE_NAME)
        .fetch_one(&mut **tx)
        .await
        .sql_context("Failed to read session sequence")?;
    Ok(id)
}

/// Reserve the next session id.
pub async fn next_session_id(provider: &SqlxProvider) -> Result<i64> {
    let mut tx = provider
        .pool()
        .begin()
        .await
        .sql_context("Failed to begin transaction")?;
    let id = next_id_in(&mut tx).await?;
    tx.commit()
        .await
        .sql_context("Failed to commit transaction")?;
    Ok(id)
}

/// Insert a new session or update an open one in place.
pub async fn upsert_session(
    provider: &SqlxProvider,
    mut record: SessionRecord,
    user_id: i64,
    sudoer_id: Option<i64>,
) -> Result<SessionRecord> {
    if record.is_closed() {
        return Err(ProviderError::InvalidRecord {
            reason: format!("session {} is marked closed", record.uuid),
        }
        .into());
    }

    record.owner_id = Some(user_id);
    record.sudoer_id = sudoer_id;
    record.node = Some(provider.node().to_string());

    let mut tx = provider
        .pool()
        .begin()
        .await
        .sql_context("Failed to begin transaction")?;

    let existing: Option<(i64, Option<i64>)> =
        sqlx::query_as("SELECT id, closed FROM sessions WHERE uuid = $1")
            .bind(record.uuid.as_str())
            .fetch_optional(&mut *tx)
            .await
            .sql_context("Failed to look up session")?;

    match existing {
        Some((_, Some(_))) => {
            return Err(ProviderError::SessionClosed { uuid: record.uuid }.into());
        }
        Some((id, None)) => {
            record.id = Some(id);
            sqlx::query(
                "UPDATE sessions SET
                    owner_id = $1, sudoer_id = $2, node = $3, started = $4,
                    time_to_live = $5, time_to_idle = $6, default_event_type = $7,
                    user_agent = $8, user_ip = $9
                 WHERE id = $10",
            )
            .bind(record.owner_id)
            .bind(record.sudoer_id)
            .bind(record.node.clone())
            .bind(to_db(record.started))
            .bind(to_db(record.time_to_live))
            .bind(to_db(record.time_to_idle))
            .bind(record.default_event_type.as_str())
            .bind(record.user_agent.clone())
            .bind(record.user_ip.clone())
            .bind(id)
            .execute(&mut *tx)
            .await
            .sql_context("Failed to update session")?;
        }
        None => {
            let id = match record.id {
                Some(id) => id,
                None => next_id_in(&mut tx).await?,
            };
            record.id = Some(id);
            sqlx::query(
                "INSERT INTO sessions (id, uuid, owner_id, sudoer_id, node, started, closed,
                    time_to_live, time_to_idle, default_event_type, user_agent, user_ip)
                 VALUES ($1, $2, $3, $4, $5, $6, NULL, $7, $8, $9, $10, $11)",
            )
            .bind(id)
            .bind(record.uuid.as_str())
            .bind(record.owner_id)
            .bind(record.sudoer_id)
            .bind(record.node.clone())
            .bind(to_db(record.started))
            .bind(to_db(record.time_to_live))
            .bind(to_db(record.time_to_idle))
            .bind(record.default_event_type.as_str())
            .bind(record.user_agent.clone())
            .bind(record.user_ip.clone())
            .execute(&mut *tx)
            .await
            .sql_context("Failed to insert session")?;
        }
    }

    tx.commit()
        .await
        .sql_context("Failed to commit transaction")?;

    debug!(uuid = %record.uuid, id = ?record.id, "Stored session");
    Ok(record)
}

/// Mark a session closed. Returns whether it was open.
pub async fn close_session(provider: &SqlxProvider, uuid: &str) -> Result<bool> {
    let mut tx = provider
        .pool()
        .begin()
        .await
        .sql_context("Failed to begin transaction")?;

    let state: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT closed FROM sessions WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&mut *tx)
            .await
            .sql_context("Failed to look up session")?;

    match state {
        None => {
            warn!(uuid = %uuid, "Ignoring close of unknown session");
            return Ok(false);
        }
        Some((Some(_),)) => {
            warn!(uuid = %uuid, "Ignoring close of already closed session");
            return Ok(false);
        }
        Some((None,)) => {}
    }

    sqlx::query("UPDATE sessions SET closed = $1 WHERE uuid = $2 AND closed IS NULL")
        .bind(to_db(provider.clock.now_millis()))
        .bind(uuid)
        .execute(&mut *tx)
        .await
        .sql_context("Failed to close session")?;

    tx.commit()
        .await
        .sql_context("Failed to commit transaction")?;

    debug!(uuid = %uuid, "Closed session");
    Ok(true)
}

pub async fn find_by_id(provider: &SqlxProvider, id: i64) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!("{SELECT_SESSION} WHERE s.id = $1"))
        .bind(id)
        .fetch_optional(provider.pool())
        .await
        .sql_context("Failed to find session by id")?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn find_by_uuid(provider: &SqlxProvider, uuid: &str) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!("{SELECT_SESSION} WHERE s.uuid = $1"))
        .bind(uuid)
        .fetch_optional(provider.pool())
        .await
        .sql_context("Failed to find session by uuid")?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn find_id_by_uuid(provider: &SqlxProvider, uuid: &str) -> Result<Option<i64>> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM sessions WHERE uuid = $1")
        .bind(uuid)
        .fetch_optional(provider.pool())
        .await
        .sql_context("Failed to find session id")?;
    Ok(row.map(|(id,)| id))
}

pub async fn list_open(provider: &SqlxProvider) -> Result<Vec<SessionRecord>> {
    let rows = sqlx::query(&format!(
        "{SELECT_SESSION} WHERE s.closed IS NULL ORDER BY s.started, s.id"
    ))
    .fetch_all(provider.pool())
    .await
    .sql_context("Failed to list open sessions")?;
    rows.iter().map(record_from_row).collect()
}
