//! Session inspection and cleanup commands.

use tether::{Clock, SessionRecord, SystemClock};

use crate::backend::{backend_label, create_provider};
use crate::cli::{ListArgs, PurgeArgs, ShowArgs};
use crate::output::{OutputFormat, SESSION_HEADERS, print_table, session_row};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Run the `list` command
pub async fn list(args: &ListArgs, format: OutputFormat) -> CommandResult {
    let provider = create_provider(&args.backend_config).await?;
    let mut records = provider.list_open_sessions().await?;
    if let Some(owner) = args.owner {
        records.retain(|record| record.owner_id == Some(owner));
    }

    match format {
        OutputFormat::Human => {
            if records.is_empty() {
                println!("No open sessions in {}.", backend_label(&args.backend_config));
                return Ok(());
            }
            let rows: Vec<_> = records.iter().map(session_row).collect();
            print_table(SESSION_HEADERS, &rows);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&records)?),
    }
    Ok(())
}

/// Run the `show` command
pub async fn show(args: &ShowArgs, format: OutputFormat) -> CommandResult {
    let provider = create_provider(&args.backend_config).await?;
    let record = provider
        .find_session_by_uuid(&args.uuid)
        .await?
        .ok_or_else(|| format!("No session {}", args.uuid))?;

    match format {
        OutputFormat::Human => {
            print_table(SESSION_HEADERS, &[session_row(&record)]);
            let state = match record.closed {
                Some(closed) => format!("closed at {}", tether::clock::format_millis(closed)),
                None => "open".to_string(),
            };
            println!();
            println!("State:       {state}");
            println!("Node:        {}", record.node.as_deref().unwrap_or("-"));
            println!("Event type:  {}", record.default_event_type);
            if let Some(ip) = &record.user_ip {
                println!("Address:     {ip}");
            }
            if let Some(sudoer) = record.sudoer_id {
                println!("Created by:  {sudoer}");
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&record)?),
    }
    Ok(())
}

/// Run the `close` command
pub async fn close(args: &ShowArgs, format: OutputFormat) -> CommandResult {
    let provider = create_provider(&args.backend_config).await?;
    let closed = provider.execute_close_session(&args.uuid).await?;
    tracing::info!(uuid = %args.uuid, closed, "Operator close");

    match format {
        OutputFormat::Human if closed => println!("Closed {}", args.uuid),
        OutputFormat::Human => println!("{} was not open", args.uuid),
        OutputFormat::Json => {
            let value = serde_json::json!({ "uuid": args.uuid, "closed": closed });
            println!("{}", serde_json::to_string(&value)?);
        }
    }
    Ok(())
}

/// Open sessions whose time-to-live ran out by `now`.
///
/// Idle limits are not considered: last access is only known to the process
/// that served the session.
fn past_ttl(records: Vec<SessionRecord>, now: u64) -> Vec<SessionRecord> {
    records
        .into_iter()
        .filter(|record| record.ttl_deadline().is_some_and(|deadline| now >= deadline))
        .collect()
}

/// Run the `purge` command
pub async fn purge(args: &PurgeArgs, format: OutputFormat) -> CommandResult {
    let provider = create_provider(&args.backend_config).await?;
    let now = SystemClock.now_millis();
    let due = past_ttl(provider.list_open_sessions().await?, now);

    let mut purged = Vec::with_capacity(due.len());
    for record in &due {
        if args.dry_run || provider.execute_close_session(&record.uuid).await? {
            purged.push(record.uuid.clone());
        }
    }
    tracing::info!(count = purged.len(), dry_run = args.dry_run, "Purged expired sessions");

    match format {
        OutputFormat::Human => {
            let verb = if args.dry_run { "Would close" } else { "Closed" };
            for uuid in &purged {
                println!("{verb} {uuid}");
            }
            println!("{verb} {} expired session(s).", purged.len());
        }
        OutputFormat::Json => {
            let value = serde_json::json!({ "dry_run": args.dry_run, "sessions": purged });
            println!("{}", serde_json::to_string(&value)?);
        }
    }
    Ok(())
}
