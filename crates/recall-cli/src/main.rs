// ============================================================================
// recall: CLI for the memory store and reconciliation runs
// ============================================================================
// Usage:
//   recall stats                                   Show item counts per namespace
//   recall list --namespace memories/u1            List items under a namespace
//   recall search --namespace memories/u1 --query Q
//   recall get|delete --namespace memories/u1 --key K
//   recall export --format json                    Export all items as JSON
//   recall enrich --user-id u1 --conversation c.json [--config cfg.json] [--dry-run]
//   recall summarize --conversation c.json
// ============================================================================

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use recall_core::memory::{
    MemoryStoreEnricher, MemoryValue, Message, RunContext, ThreadSummarizer,
};
use recall_core::store::{parse_namespace, SearchRequest, StoreItem};
use recall_core::{EnricherConfig, LlmClient, LlmConfig, RedbStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Recall memory store tool
#[derive(Parser)]
#[command(name = "recall", version, about = "Inspect the memory store and run memory enrichment")]
struct Cli {
    /// Path to the database file (default: ~/.recall/memories.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show item counts per namespace
    Stats,

    /// List items under a namespace prefix
    List {
        /// Slash-separated namespace prefix, e.g. memories/u1
        #[arg(long, default_value = "")]
        namespace: String,
    },

    /// Lexical search under a namespace prefix
    Search {
        #[arg(long, default_value = "")]
        namespace: String,

        #[arg(long)]
        query: String,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Print one item
    Get {
        #[arg(long)]
        namespace: String,

        #[arg(long)]
        key: String,
    },

    /// Delete one item
    Delete {
        #[arg(long)]
        namespace: String,

        #[arg(long)]
        key: String,
    },

    /// Export all items as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },

    /// Reconcile a conversation against the user's stored memories
    Enrich {
        #[arg(long)]
        user_id: String,

        /// JSON array of {"role", "content"} messages
        #[arg(long)]
        conversation: PathBuf,

        /// Enricher settings as JSON (instructions, phases, query_limit, ...)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Show the planned writes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Summarize a conversation
    Summarize {
        #[arg(long)]
        conversation: PathBuf,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn preview(item: &StoreItem) -> String {
    let value = MemoryValue::from_value(&item.value);
    let text = match value.content.get("content").and_then(|c| c.as_str()) {
        Some(text) => text.to_string(),
        None => value.content.to_string(),
    };
    let mut short: String = text.chars().take(50).collect();
    if text.chars().count() > 50 {
        short.push_str("...");
    }
    format!("[{}] {}", value.kind, short)
}

fn load_conversation(path: &Path) -> Result<Vec<Message>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read conversation {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of messages", path.display()))
}

fn init_logging() -> Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recall_core=info".parse()?)
                .add_directive("recall=info".parse()?),
        )
        .init();
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    run(Cli::parse())
}

fn run(cli: Cli) -> Result<()> {
    // Only commands that touch the store open (and lock) the database
    let db_path = cli.db_path;
    let open_store = || RedbStore::open(db_path.as_deref());

    match cli.command {
        Commands::Stats => cmd_stats(&open_store()?),
        Commands::List { namespace } => cmd_list(&open_store()?, &namespace),
        Commands::Search {
            namespace,
            query,
            limit,
        } => cmd_search(&open_store()?, &namespace, &query, limit),
        Commands::Get { namespace, key } => cmd_get(&open_store()?, &namespace, &key),
        Commands::Delete { namespace, key } => cmd_delete(&open_store()?, &namespace, &key),
        Commands::Export { format } => cmd_export(&open_store()?, &format),
        Commands::Enrich {
            user_id,
            conversation,
            config,
            dry_run,
        } => cmd_enrich(
            &open_store()?,
            &user_id,
            &conversation,
            config.as_deref(),
            dry_run,
        ),
        Commands::Summarize { conversation } => cmd_summarize(&conversation),
    }
}

fn cmd_stats(store: &RedbStore) -> Result<()> {
    let stats = store.stats()?;

    println!("=== Recall Memory Store Stats ===");
    println!("Database: {}", store.path().display());
    println!();
    println!("Items: {} total", stats.total_items);
    for ns in &stats.namespaces {
        println!("  {:<40} {}", ns.namespace.join("/"), ns.items);
    }

    Ok(())
}

fn print_items(items: &[StoreItem]) {
    println!(
        "{:<24}  {:<36}  {:<22}  {}",
        "NAMESPACE", "KEY", "UPDATED AT", "CONTENT"
    );
    println!("{}", "-".repeat(110));

    for item in items {
        println!(
            "{:<24}  {:<36}  {:<22}  {}",
            item.namespace.join("/"),
            item.key,
            format_timestamp(item.updated_at),
            preview(item)
        );
    }
}

fn cmd_list(store: &RedbStore, namespace: &str) -> Result<()> {
    let items = store.list_items(&parse_namespace(namespace))?;

    if items.is_empty() {
        println!("No items found.");
        return Ok(());
    }

    print_items(&items);
    println!("\nTotal: {} items", items.len());
    Ok(())
}

fn cmd_search(store: &RedbStore, namespace: &str, query: &str, limit: usize) -> Result<()> {
    let items = store.search_items(&parse_namespace(namespace), &SearchRequest::query(query, limit))?;

    if items.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for item in &items {
        println!(
            "{:.2}  {}/{}  {}",
            item.score.unwrap_or(0.0),
            item.namespace.join("/"),
            item.key,
            preview(item)
        );
    }
    Ok(())
}

fn cmd_get(store: &RedbStore, namespace: &str, key: &str) -> Result<()> {
    match store.get_item(&parse_namespace(namespace), key)? {
        Some(item) => println!("{}", serde_json::to_string_pretty(&item)?),
        None => anyhow::bail!("No item {} under {}", key, namespace),
    }
    Ok(())
}

fn cmd_delete(store: &RedbStore, namespace: &str, key: &str) -> Result<()> {
    if store.delete_item(&parse_namespace(namespace), key)? {
        println!("Deleted {}/{}", namespace, key);
    } else {
        println!("Nothing to delete at {}/{}", namespace, key);
    }
    Ok(())
}

fn cmd_export(store: &RedbStore, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": store.stats()?,
        "items": store.list_items(&[])?,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn cmd_enrich(
    store: &RedbStore,
    user_id: &str,
    conversation: &Path,
    config: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let messages = load_conversation(conversation)?;
    let config = match config {
        Some(path) => EnricherConfig::from_json_file(path)?,
        None => EnricherConfig::default(),
    };

    let client = Arc::new(LlmClient::new(LlmConfig::from_env()?));
    let enricher = MemoryStoreEnricher::new(client.clone(), client, config)?;
    let run = RunContext::for_user(user_id);

    if dry_run {
        println!("=== DRY RUN: no data will be written ===\n");
        let runtime = tokio::runtime::Runtime::new()?;
        let plan = runtime.block_on(enricher.plan(store, &messages, &run))?;

        println!(
            "Located {} existing memories under {}",
            plan.snapshot.len(),
            plan.namespace.join("/")
        );
        println!("{}", serde_json::to_string_pretty(&plan.mutations)?);
        return Ok(());
    }

    let outcome = enricher.enrich_blocking(store, &messages, &run)?;
    info!(
        "Applied {} puts and {} deletes for {}",
        outcome.puts.len(),
        outcome.deletes.len(),
        user_id
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !outcome.is_complete() {
        anyhow::bail!("{} store writes failed", outcome.failures.len());
    }
    Ok(())
}

fn cmd_summarize(conversation: &Path) -> Result<()> {
    let messages = load_conversation(conversation)?;
    let summarizer = ThreadSummarizer::new(Arc::new(LlmClient::new(LlmConfig::from_env()?)));

    let runtime = tokio::runtime::Runtime::new()?;
    let summary = runtime.block_on(summarizer.summarize(&messages))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
