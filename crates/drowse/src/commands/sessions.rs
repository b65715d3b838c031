//! Sessions command - inspect and purge a session store.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use console::{Style, style};
use serde::Serialize;
use tracing::debug;

use drowse_session::{
    Deadlines, FileStore, ManagerConfig, RetryPolicy, SessionManager, SessionStore, decode,
    elapsed, is_tombstone,
};

use super::Context;

/// Arguments for the sessions command.
#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Subcommand, Debug)]
pub enum SessionsCommand {
    /// List idled sessions in a store
    List {
        /// Store directory (default: from config)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Delete stored sessions past their inactivity limit
    Purge {
        /// Store directory (default: from config)
        #[arg(long)]
        store: Option<PathBuf>,

        /// Also delete sessions that cannot be decoded
        #[arg(long)]
        delete_unrestorable: bool,
    },
}

/// One stored session as shown by `sessions list`.
#[derive(Debug, Serialize)]
struct StoredSession {
    id: String,
    created_at: Option<DateTime<Utc>>,
    last_accessed_at: Option<DateTime<Utc>>,
    max_inactive_secs: Option<u64>,
    attributes: Option<usize>,
    expired: bool,
    error: Option<String>,
}

/// Run the sessions command.
pub async fn run(args: SessionsArgs, ctx: &Context) -> Result<()> {
    match args.command {
        SessionsCommand::List { store } => {
            let dir = ctx.store_dir(store.as_deref())?;
            cmd_list(dir, ctx)
        }
        SessionsCommand::Purge {
            store,
            delete_unrestorable,
        } => {
            let dir = ctx.store_dir(store.as_deref())?;
            cmd_purge(dir, delete_unrestorable, ctx)
        }
    }
}

fn cmd_list(dir: PathBuf, ctx: &Context) -> Result<()> {
    let store = FileStore::new(&dir, RetryPolicy::default());
    let now = Utc::now();
    debug!(store = %dir.display(), "Listing stored sessions");

    let mut rows = Vec::new();
    for id in store.ids()? {
        let row = match store.load(&id) {
            // Left behind by a failed delete; the session is gone.
            Ok(Some(blob)) if is_tombstone(&blob) => continue,
            Ok(Some(blob)) => describe(id, &blob, now),
            // Deleted between listing and loading.
            Ok(None) => continue,
            Err(e) => unreadable(id, e.to_string()),
        };
        rows.push(row);
    }

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!("{}", style(format!("Sessions in {}", dir.display())).bold());
    if rows.is_empty() {
        println!("  {}", dim.apply_to("No stored sessions"));
        return Ok(());
    }

    for row in &rows {
        match &row.error {
            Some(error) => println!(
                "  {}  {}",
                style(&row.id).red(),
                dim.apply_to(format!("unreadable: {error}"))
            ),
            None => {
                let timestamp = |t: Option<DateTime<Utc>>| {
                    t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default()
                };
                let status = if row.expired {
                    style("expired").yellow()
                } else {
                    style("idled").green()
                };
                println!(
                    "  {}  created {}  accessed {}  {} attrs  {}",
                    style(&row.id).cyan(),
                    dim.apply_to(timestamp(row.created_at)),
                    dim.apply_to(timestamp(row.last_accessed_at)),
                    row.attributes.unwrap_or(0),
                    status
                );
            }
        }
    }
    if ctx.verbose {
        println!("\n  {}", dim.apply_to(format!("{} stored", rows.len())));
    }
    Ok(())
}

fn describe(id: String, blob: &[u8], now: DateTime<Utc>) -> StoredSession {
    let snapshot = match decode(blob) {
        Ok(snapshot) => snapshot,
        Err(e) => return unreadable(id, e.to_string()),
    };

    let deadlines = Deadlines {
        max_inactive: snapshot.max_inactive_interval,
        idle_after: Duration::ZERO,
    };
    let inactive = elapsed(now, snapshot.last_accessed_at);

    StoredSession {
        id,
        created_at: Some(snapshot.created_at),
        last_accessed_at: Some(snapshot.last_accessed_at),
        max_inactive_secs: Some(snapshot.max_inactive_interval.as_secs()),
        attributes: Some(snapshot.attributes.len()),
        expired: deadlines.is_expired(inactive),
        error: None,
    }
}

fn unreadable(id: String, error: String) -> StoredSession {
    StoredSession {
        id,
        created_at: None,
        last_accessed_at: None,
        max_inactive_secs: None,
        attributes: None,
        expired: false,
        error: Some(error),
    }
}

fn cmd_purge(dir: PathBuf, delete_unrestorable: bool, ctx: &Context) -> Result<()> {
    // Idling stays off: only expired sessions are touched, each by its own limit.
    let config = ManagerConfig::new()
        .with_store_directory(&dir)
        .with_idle_save_period(Duration::ZERO)
        .with_delete_unrestorable(delete_unrestorable);
    let manager = SessionManager::new(config);
    debug!(store = %dir.display(), "Purging expired sessions");
    let report = manager.scavenge();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let green = Style::new().green();
    println!(
        "{} Purged {} expired of {} stored sessions",
        green.apply_to("✓"),
        style(report.expired).cyan(),
        report.adopted
    );
    if report.failures > 0 {
        println!(
            "  {}",
            style(format!("{} sessions could not be processed", report.failures)).yellow()
        );
    }
    Ok(())
}
