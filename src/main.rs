use clap::{Parser, Subcommand};
use colored::*;
use devote::{Adapter, SqliteBackend, Store, StoreError};
use eyre::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "devote")]
#[command(about = "Devote - a single to-do list that remembers what you saved")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the store directory (default: local data directory)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the task list, oldest first
    List,

    /// Save a new task
    Add {
        /// Task text (words are joined with spaces)
        text: Vec<String>,
    },

    /// Delete tasks by their position in the list
    Delete {
        /// Positions as shown by `list`
        #[arg(required = true)]
        indexes: Vec<usize>,
    },

    /// Show one task with its creation time
    Show {
        /// Position as shown by `list`
        index: usize,
    },

    /// Rebuild the SQLite cache from the JSONL log
    Sync,
}

fn store_path(cli: &Cli) -> PathBuf {
    cli.store_path.clone().unwrap_or_else(|| {
        dirs::data_local_dir()
            .map(|d| d.join("devote"))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

fn print_list(adapter: &Adapter) {
    let tasks = adapter.observed_tasks();
    if tasks.is_empty() {
        println!("{}", "No tasks yet.".dimmed());
        return;
    }

    for (index, task) in tasks.iter().enumerate() {
        println!("{:>3}  {}", index.to_string().cyan(), task.task.bold());
    }
}

fn report_store_error(e: &eyre::Report) {
    if let Some(StoreError::Persistence(_)) = e.downcast_ref::<StoreError>() {
        eprintln!("{} Could not save changes, nothing was modified. Try again.", "✗".red());
    }
}

fn open_adapter(path: &Path) -> Result<Adapter> {
    let store = Store::open(path).with_context(|| format!("Failed to open store at {}", path.display()))?;
    Ok(Adapter::new(store))
}

fn run(cli: Cli) -> Result<()> {
    let path = store_path(&cli);

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => print_list(&open_adapter(&path)?),
        Commands::Add { text } => {
            let mut adapter = open_adapter(&path)?;
            adapter.update_draft(text.join(" "));
            if !adapter.can_submit() {
                eprintln!("{} Nothing to save: task text is empty", "✗".red());
                return Ok(());
            }
            if let Some(task) = adapter.submit().inspect_err(report_store_error)? {
                println!("{} Saved {}", "✓".green(), task.task.bold());
            }
        }
        Commands::Delete { indexes } => {
            let mut adapter = open_adapter(&path)?;
            let removed = adapter.delete_at(indexes).inspect_err(report_store_error)?;
            println!("{} Deleted {} task(s)", "✓".green(), removed);
            print_list(&adapter);
        }
        Commands::Show { index } => {
            let adapter = open_adapter(&path)?;
            match adapter.task_at(index) {
                Some(task) => {
                    println!("{}", task.task.bold());
                    println!("Item at {}", task.display_timestamp());
                }
                None => eprintln!("{} No task at position {}", "✗".red(), index),
            }
        }
        Commands::Sync => {
            println!("Syncing database from JSONL...");
            let count = SqliteBackend::open(&path)?.sync()?;
            println!("{} Sync complete, {} task(s)", "✓".green(), count);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}
