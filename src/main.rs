mod capture;
mod classify;
mod db;
mod dedup;
mod dom;
mod extract;
mod sync;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::classify::server_phone_shape;
use crate::db::StoredSession;
use crate::dom::Dom;

#[derive(Parser)]
#[command(name = "formcap", about = "Form field capture, validation and sync pipeline")]
struct Cli {
    /// SQLite store path
    #[arg(long, default_value = db::DEFAULT_DB_PATH, global = true)]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, validate and store form fields from a page snapshot
    Capture {
        /// XHTML page snapshot to read
        file: PathBuf,
        /// Page URL at capture time
        #[arg(short, long)]
        url: String,
        /// Print the extracted fields without storing a session
        #[arg(long)]
        dry_run: bool,
    },
    /// List stored sessions, newest first (pending only by default)
    List {
        /// Include synced and duplicate sessions
        #[arg(short, long)]
        all: bool,
    },
    /// Show store statistics
    Stats,
    /// Push pending sessions to the remote collector
    Sync {
        /// Collector endpoint (POST target)
        #[arg(short, long)]
        endpoint: String,
        /// Page title to attach to each payload
        #[arg(short, long, default_value = "")]
        title: String,
        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Fetch synced records back from the remote collector
    Fetch {
        /// Collector endpoint (GET <endpoint>/all)
        #[arg(short, long)]
        endpoint: String,
        /// Per-request timeout in seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
    /// Delete every stored session
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Capture { file, url, dry_run } => {
            let snapshot = std::fs::read_to_string(&file)?;
            let dom = Dom::parse_snapshot(&snapshot)?;

            if dry_run {
                let fields = capture::collect_fields(&dom);
                if fields.is_empty() {
                    println!("No form data found on this page.");
                    return Ok(());
                }
                println!("Found {} valid form fields:", fields.len());
                for f in &fields {
                    print_field(f);
                }
                return Ok(());
            }

            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let outcome = capture::capture(&conn, &dom, &url)?;
            match outcome.session_id {
                Some(id) => {
                    println!(
                        "Stored session {} with {} valid fields.",
                        id,
                        outcome.fields.len()
                    );
                    if outcome.duplicate {
                        println!("Duplicate of already synced data; excluded from sync.");
                    }
                }
                None => println!("No form data found on this page."),
            }
            Ok(())
        }
        Commands::List { all } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let sessions = db::fetch_all(&conn)?;
            let visible: Vec<&StoredSession> = sessions
                .iter()
                .filter(|s| all || (!s.synced && !s.duplicate))
                .collect();
            if visible.is_empty() {
                println!("No {} sessions.", if all { "stored" } else { "pending" });
                return Ok(());
            }
            for s in visible {
                let mut flags = Vec::new();
                if s.synced {
                    flags.push("synced");
                }
                if s.duplicate {
                    flags.push("duplicate");
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                println!("#{} {} {}{}", s.id, s.timestamp, s.url, flags);
                for f in &s.fields {
                    print_field(f);
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Sessions:   {}", s.total);
            println!("Synced:     {}", s.synced);
            println!("Duplicates: {}", s.duplicates);
            println!("Pending:    {}", s.pending);
            println!("Fields:     {}", s.fields);
            Ok(())
        }
        Commands::Sync {
            endpoint,
            title,
            timeout_secs,
        } => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let stats = sync::sync(
                &conn,
                &endpoint,
                &title,
                Duration::from_secs(timeout_secs),
            )
            .await?;
            if stats.attempted == 0 {
                println!("No data to sync.");
            } else {
                println!("Synced {} of {} sessions.", stats.synced, stats.attempted);
            }
            Ok(())
        }
        Commands::Fetch {
            endpoint,
            timeout_secs,
        } => {
            let records =
                sync::fetch_remote(&endpoint, Duration::from_secs(timeout_secs)).await?;
            if records.is_empty() {
                println!("No synced data found on server.");
                return Ok(());
            }
            for r in &records {
                println!(
                    "{} {}",
                    r.recorded_at(),
                    r.url.as_deref().unwrap_or("(no url)")
                );
                for (label, value) in [
                    ("aadhar", &r.aadhar),
                    ("pan", &r.pan),
                    ("name", &r.name),
                    ("email", &r.email),
                    ("phone", &r.phone),
                ] {
                    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                        if label == "phone" && !server_phone_shape(v) {
                            println!("  {}: {} (unexpected format)", label, v);
                        } else {
                            println!("  {}: {}", label, v);
                        }
                    }
                }
            }
            println!("{} records.", records.len());
            Ok(())
        }
        Commands::Clear => {
            let conn = db::connect(&cli.db)?;
            db::init_schema(&conn)?;
            let removed = db::clear_all(&conn)?;
            println!("Cleared {} sessions.", removed);
            Ok(())
        }
    }
}

fn print_field(f: &classify::ValidatedField) {
    println!(
        "  {} = {} ({}, {})",
        f.observation.name,
        f.observation.value,
        f.validation.role.as_str(),
        f.validation.message
    );
}
