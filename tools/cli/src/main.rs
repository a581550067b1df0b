//! Expensync CLI - Command line interface for expense sync.
//!
//! This tool runs sync requests against a local record store and provides
//! plain record operations for inspecting and editing expenses.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use expensync_common::{
    Amount, Category, Description, Error, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId,
};
use expensync_storage::{create_default_registry, RecordStore};
use expensync_sync::{ExpenseService, SyncConfig, SyncEngine, SyncRequest};

#[derive(Parser)]
#[command(name = "expensync")]
#[command(about = "Expensync - Personal expense sync and conflict resolution")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Record store backend: "memory" or "sqlite".
    #[arg(long, global = true, default_value = "sqlite")]
    store: String,

    /// SQLite database file (default: user data directory).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Sync configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync request file and print the response.
    Sync {
        /// Sync request (JSON).
        #[arg(short, long)]
        request: PathBuf,

        /// Write the response here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List expenses of an owner, newest first.
    List {
        /// Owner identifier.
        #[arg(short, long)]
        owner: String,
    },

    /// Show one expense as JSON.
    Get {
        /// Expense identifier.
        #[arg(short, long)]
        id: String,
    },

    /// Add an expense.
    Add {
        /// Owner identifier.
        #[arg(short, long)]
        owner: String,

        /// Amount, non-negative.
        #[arg(short, long)]
        amount: Decimal,

        /// Description.
        #[arg(short, long)]
        description: String,

        /// One of: Food, Transport, Entertainment, Bills, Shopping, Other.
        #[arg(short, long)]
        category: Category,

        /// When the expense occurred (RFC 3339, default: now).
        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Update an expense against the last-modified value you last saw.
    Update {
        /// Expense identifier.
        #[arg(short, long)]
        id: String,

        /// Last-modified value the edit is based on (RFC 3339).
        #[arg(short, long)]
        baseline: DateTime<Utc>,

        #[arg(short, long)]
        amount: Option<Decimal>,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        category: Option<Category>,

        #[arg(long)]
        date: Option<DateTime<Utc>>,
    },

    /// Remove an expense.
    Remove {
        /// Expense identifier.
        #[arg(short, long)]
        id: String,
    },

    /// List the expense categories.
    Categories,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides --verbose.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Categories = cli.command {
        for category in Category::ALL {
            println!("{}", category);
        }
        return Ok(());
    }

    let store = open_store(&cli.store, cli.db.as_deref())?;

    match cli.command {
        Commands::Sync { request, output } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_sync(store, config, &request, output.as_deref()).await
        }

        Commands::List { owner } => cmd_list(store, &owner).await,

        Commands::Get { id } => cmd_get(store, &id).await,

        Commands::Add {
            owner,
            amount,
            description,
            category,
            date,
        } => cmd_add(store, &owner, amount, &description, category, date).await,

        Commands::Update {
            id,
            baseline,
            amount,
            description,
            category,
            date,
        } => {
            let patch = build_patch(baseline, amount, description.as_deref(), category, date)?;
            cmd_update(store, &id, &patch).await
        }

        Commands::Remove { id } => cmd_remove(store, &id).await,

        Commands::Categories => Ok(()),
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("expensync")
        .join("expenses.db")
}

/// Resolve the store backend through the registry.
fn open_store(name: &str, db: Option<&Path>) -> Result<Arc<dyn RecordStore>> {
    let registry = create_default_registry();

    let config = if name == "sqlite" {
        let path = db.map(Path::to_path_buf).unwrap_or_else(default_db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        serde_json::json!({ "path": path.to_string_lossy() })
    } else {
        serde_json::json!({})
    };

    let store = registry
        .resolve(name, config)
        .with_context(|| format!("Failed to open '{}' store", name))?;
    info!("Using {} store", store.name());
    Ok(store)
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn build_patch(
    baseline: DateTime<Utc>,
    amount: Option<Decimal>,
    description: Option<&str>,
    category: Option<Category>,
    date: Option<DateTime<Utc>>,
) -> Result<ExpensePatch> {
    let mut patch = ExpensePatch::new(baseline);
    if let Some(amount) = amount {
        patch = patch.with_amount(Amount::new(amount).context("Invalid amount")?);
    }
    if let Some(description) = description {
        patch = patch.with_description(Description::new(description).context("Invalid description")?);
    }
    if let Some(category) = category {
        patch = patch.with_category(category);
    }
    if let Some(date) = date {
        patch = patch.with_date(date);
    }
    Ok(patch)
}

fn print_json(expense: &Expense) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(expense)?);
    Ok(())
}

/// Run one sync request file.
async fn cmd_sync(
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    request_path: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let text = std::fs::read_to_string(request_path)
        .with_context(|| format!("Failed to read {}", request_path.display()))?;
    let request: SyncRequest = serde_json::from_str(&text).context("Invalid sync request")?;

    let engine = SyncEngine::with_store(store, config);
    let response = engine.synchronize(request).await.context("Sync failed")?;
    let body = serde_json::to_string_pretty(&response)?;

    match output {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Response written to {}", path.display());
        }
        None => println!("{}", body),
    }

    Ok(())
}

async fn cmd_list(store: Arc<dyn RecordStore>, owner: &str) -> Result<()> {
    let owner = OwnerId::new(owner).context("Invalid owner")?;
    let expenses = ExpenseService::new(store)
        .list(&owner)
        .await
        .context("Failed to list expenses")?;

    if expenses.is_empty() {
        println!("No expenses.");
    } else {
        for expense in expenses {
            println!(
                "{}  {}  {:>10}  {:<13}  {}",
                expense.id,
                expense.date.format("%Y-%m-%d"),
                expense.amount.to_string(),
                expense.category.as_str(),
                expense.description
            );
        }
    }

    Ok(())
}

async fn cmd_get(store: Arc<dyn RecordStore>, id: &str) -> Result<()> {
    let expense = ExpenseService::new(store)
        .get(&ExpenseId::new(id))
        .await
        .context("Failed to get expense")?;
    print_json(&expense)
}

async fn cmd_add(
    store: Arc<dyn RecordStore>,
    owner: &str,
    amount: Decimal,
    description: &str,
    category: Category,
    date: Option<DateTime<Utc>>,
) -> Result<()> {
    let owner = OwnerId::new(owner).context("Invalid owner")?;
    let new = NewExpense {
        amount: Amount::new(amount).context("Invalid amount")?,
        description: Description::new(description).context("Invalid description")?,
        category,
        date,
    };

    let expense = ExpenseService::new(store)
        .create(&owner, new)
        .await
        .context("Failed to add expense")?;

    println!("Expense added.");
    println!("  ID: {}", expense.id);
    println!("  Last modified: {}", expense.last_modified.to_rfc3339());
    Ok(())
}

async fn cmd_update(store: Arc<dyn RecordStore>, id: &str, patch: &ExpensePatch) -> Result<()> {
    match ExpenseService::new(store).update(&ExpenseId::new(id), patch).await {
        Ok(expense) => print_json(&expense),
        Err(Error::Conflict(server)) => {
            print_json(&server)?;
            anyhow::bail!(
                "Expense {} was modified at {}, after baseline {}",
                server.id,
                server.last_modified.to_rfc3339(),
                patch.last_modified.to_rfc3339()
            )
        }
        Err(e) => Err(e).context("Failed to update expense"),
    }
}

async fn cmd_remove(store: Arc<dyn RecordStore>, id: &str) -> Result<()> {
    ExpenseService::new(store)
        .delete(&ExpenseId::new(id))
        .await
        .context("Failed to remove expense")?;
    println!("Expense removed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_update() {
        let cli = Cli::try_parse_from([
            "expensync",
            "--store",
            "memory",
            "update",
            "--id",
            "R1",
            "--baseline",
            "2024-01-15T12:00:00Z",
            "--amount",
            "50",
            "--category",
            "Food",
        ])
        .unwrap();

        assert_eq!(cli.store, "memory");
        match cli.command {
            Commands::Update {
                id,
                amount,
                category,
                description,
                ..
            } => {
                assert_eq!(id, "R1");
                assert_eq!(amount, Some(Decimal::from(50)));
                assert_eq!(category, Some(Category::Food));
                assert!(description.is_none());
            }
            _ => panic!("expected update"),
        }
    }

    #[test]
    fn test_unknown_category_rejected() {
        let result = Cli::try_parse_from([
            "expensync", "add", "-o", "U1", "-a", "3", "-d", "Tea", "-c", "Travel",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_store_lists_choices() {
        let Err(error) = open_store("mongo", None) else {
            panic!("mongo store should not resolve");
        };
        let message = format!("{:#}", error);
        assert!(message.contains("Failed to open 'mongo' store"), "{}", message);
        assert!(message.contains("expected one of: memory, sqlite"), "{}", message);
    }

    #[test]
    fn test_build_patch_rejects_negative_amount() {
        let result = build_patch(Utc::now(), Some(Decimal::from(-1)), None, None, None);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sync_file_against_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let request = dir.path().join("request.json");
        let response = dir.path().join("response.json");
        std::fs::write(
            &request,
            r#"{"ownerId":"U1","pendingChanges":[{"type":"create","clientRef":"n1","data":{"amount":4.5,"description":"Coffee","category":"Food"}}]}"#,
        )
        .unwrap();

        let store = open_store("memory", None).unwrap();
        cmd_sync(store, SyncConfig::default(), &request, Some(&response))
            .await
            .unwrap();

        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&response).unwrap()).unwrap();
        assert_eq!(body["syncResults"][0]["status"], "success");
        assert_eq!(body["syncResults"][0]["clientRef"], "n1");
    }
}
