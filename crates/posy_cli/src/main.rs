//! Posy CLI
//!
//! Command-line tools for the flower shop's local store.
//!
//! # Commands
//!
//! - `catalog` - Put, read, list, delete and rename catalog records
//! - `order` - Create and edit orders, move them through their lifecycle
//! - `backup` - Create, list, prune and restore local snapshots
//! - `sync` - Run a sync cycle, show or reset the sync state
//! - `conflicts` - List and resolve records changed on both sides
//! - `import-legacy` - Import the legacy desktop JSON files
//! - `watch` - Keep syncing in the background until Ctrl-C

mod commands;

use clap::{Args, Parser, Subcommand};
use commands::{Context, RemoteArgs};
use posy_core::{Collection, OrderStatus, RecordKey, SnapshotId};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Posy flower shop data tools.
#[derive(Parser)]
#[command(name = "posy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
    #[arg(global = true, short, long, default_value = "posy-data")]
    data_dir: PathBuf,

    #[command(flatten)]
    remote: RemoteArgs,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Catalog records: flowers, colors, bouquets and pricing
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },

    /// Customer orders
    Order {
        #[command(subcommand)]
        command: OrderCommand,
    },

    /// Local snapshots
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Remote sync
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },

    /// Records changed on both sides
    Conflicts {
        #[command(subcommand)]
        command: ConflictsCommand,
    },

    /// Import the legacy desktop JSON files from a directory
    ImportLegacy {
        /// Directory holding Flowers.json, Colors.json, Bouquets.json and orders/
        dir: PathBuf,
    },

    /// Sync in the background until interrupted
    Watch {
        /// Seconds between scheduled cycles
        #[arg(short, long, default_value = "900")]
        interval: u64,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CatalogCommand {
    /// Create or update a record
    Put {
        /// Collection (flowers, colors, bouquets, pricing)
        collection: Collection,
        /// Record id
        id: String,
        /// Attribute as key=value; values are parsed as JSON, else kept as text
        #[arg(short, long = "attr")]
        attrs: Vec<String>,
        /// Remove an attribute
        #[arg(long)]
        unset: Vec<String>,
        /// Fail unless the current version is this one
        #[arg(short, long)]
        expected: Option<u64>,
    },

    /// Show a record
    Get {
        /// Collection
        collection: Collection,
        /// Record id
        id: String,
    },

    /// List the records of a collection
    List {
        /// Collection
        collection: Collection,
        /// Include tombstones
        #[arg(long)]
        deleted: bool,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a record
    Delete {
        /// Collection
        collection: Collection,
        /// Record id
        id: String,
        /// Fail unless the current version is this one
        #[arg(short, long)]
        expected: Option<u64>,
    },

    /// Rename a record
    Rename {
        /// Collection
        collection: Collection,
        /// Current id
        from: String,
        /// New id
        to: String,
    },
}

#[derive(Subcommand)]
enum OrderCommand {
    /// Create a draft order
    Create {
        /// Line as catalog_id:quantity:unit_price
        #[arg(short, long = "line")]
        lines: Vec<String>,
    },

    /// Add a line (merged with an existing line at the same price)
    Add {
        /// Order id
        order: String,
        /// Catalog id
        catalog_id: String,
        /// Quantity
        quantity: u32,
        /// Unit price in minor units
        unit_price: u64,
    },

    /// Change the quantity of a line
    Qty {
        /// Order id
        order: String,
        /// Catalog id
        catalog_id: String,
        /// New quantity
        quantity: u32,
    },

    /// Remove a line
    Remove {
        /// Order id
        order: String,
        /// Catalog id
        catalog_id: String,
    },

    /// Move an order to a new status
    Status {
        /// Order id
        order: String,
        /// draft, confirmed, fulfilled or cancelled
        status: OrderStatus,
    },

    /// Show an order
    Show {
        /// Order id
        order: String,
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List orders
    List {
        /// Only orders in this status
        #[arg(short, long)]
        status: Option<OrderStatus>,
    },
}

#[derive(Subcommand)]
enum BackupCommand {
    /// Snapshot the current state
    Create,

    /// List snapshots, newest first
    List,

    /// Delete old snapshots
    Prune {
        /// Always keep this many newest snapshots
        #[arg(short, long)]
        keep: Option<usize>,
        /// Also keep snapshots younger than this many days
        #[arg(long)]
        max_age_days: Option<u64>,
    },

    /// Replace the store with a snapshot
    Restore {
        /// Snapshot id
        id: SnapshotId,
        /// Confirm replacing the current data
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Run one sync cycle now
    Run,

    /// Show the sync state
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Forget the sync state; the next cycle compares everything
    Reset,
}

#[derive(Subcommand)]
enum ConflictsCommand {
    /// List pending conflicts
    List,

    /// Resolve a conflict
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct ResolveArgs {
    /// Record key as collection/id
    key: RecordKey,
    /// Keep the local record
    #[arg(long, conflicts_with = "remote", required_unless_present = "remote")]
    local: bool,
    /// Take the remote copy
    #[arg(long)]
    remote: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("Posy CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Posy Core v{}", posy_core::VERSION);
        return Ok(());
    }

    let ctx = Context::open(&cli.data_dir, cli.remote)?;
    match cli.command {
        Commands::Catalog { command } => match command {
            CatalogCommand::Put {
                collection,
                id,
                attrs,
                unset,
                expected,
            } => commands::catalog::put(&ctx, collection, &id, &attrs, &unset, expected)?,
            CatalogCommand::Get { collection, id } => commands::catalog::get(&ctx, collection, &id)?,
            CatalogCommand::List {
                collection,
                deleted,
                format,
            } => commands::catalog::list(&ctx, collection, deleted, &format)?,
            CatalogCommand::Delete {
                collection,
                id,
                expected,
            } => commands::catalog::delete(&ctx, collection, &id, expected)?,
            CatalogCommand::Rename {
                collection,
                from,
                to,
            } => commands::catalog::rename(&ctx, collection, &from, &to)?,
        },
        Commands::Order { command } => match command {
            OrderCommand::Create { lines } => commands::order::create(&ctx, &lines)?,
            OrderCommand::Add {
                order,
                catalog_id,
                quantity,
                unit_price,
            } => commands::order::add(&ctx, &order, &catalog_id, quantity, unit_price)?,
            OrderCommand::Qty {
                order,
                catalog_id,
                quantity,
            } => commands::order::set_quantity(&ctx, &order, &catalog_id, quantity)?,
            OrderCommand::Remove { order, catalog_id } => {
                commands::order::remove(&ctx, &order, &catalog_id)?;
            }
            OrderCommand::Status { order, status } => commands::order::status(&ctx, &order, status)?,
            OrderCommand::Show { order, format } => commands::order::show(&ctx, &order, &format)?,
            OrderCommand::List { status } => commands::order::list(&ctx, status)?,
        },
        Commands::Backup { command } => match command {
            BackupCommand::Create => commands::backup::create(&ctx)?,
            BackupCommand::List => commands::backup::list(&ctx)?,
            BackupCommand::Prune { keep, max_age_days } => {
                commands::backup::prune(&ctx, keep, max_age_days)?;
            }
            BackupCommand::Restore { id, yes } => commands::backup::restore(&ctx, &id, yes)?,
        },
        Commands::Sync { command } => match command {
            SyncCommand::Run => commands::sync::run(&ctx)?,
            SyncCommand::Status { format } => commands::sync::status(&ctx, &format)?,
            SyncCommand::Reset => commands::sync::reset(&ctx)?,
        },
        Commands::Conflicts { command } => match command {
            ConflictsCommand::List => commands::conflicts::list(&ctx)?,
            ConflictsCommand::Resolve(args) => {
                commands::conflicts::resolve(&ctx, &args.key, args.local)?;
            }
        },
        Commands::ImportLegacy { dir } => commands::import::run(&ctx, &dir)?,
        Commands::Watch { interval } => commands::watch::run(ctx, interval)?,
        Commands::Version => {}
    }

    Ok(())
}
