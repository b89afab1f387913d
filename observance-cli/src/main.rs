use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::{Context, WindowArgs};

#[derive(Parser)]
#[command(name = "observance")]
#[command(about = "Checks bookings against prayer times, holidays and Ramadan policies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the rule catalog (JSON or TOML)
    #[arg(short, long, default_value = "catalog.toml")]
    catalog: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prayer-time table (TOML); the built-in Dubai table is used when omitted
    #[arg(long)]
    prayer_table: Option<PathBuf>,

    /// Write logs as JSON lines
    #[arg(long, action)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a proposed meeting window
    Check {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Re-evaluate stored bookings against the current catalog
    Rescan {
        /// Path to a JSON file with `booking_refs`
        #[arg(long)]
        bookings: PathBuf,
    },

    /// List observance instances inside a window
    Expand {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Show consolidated busy periods inside a window
    Busy {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Manage catalog rules
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Add or replace a rule
    Add {
        /// Rule ID (overrides ID in file if provided)
        #[arg(long)]
        id: Option<String>,

        /// Path to rule definition file (JSON or TOML)
        #[arg(long)]
        file: PathBuf,
    },

    /// Get rule details
    Get {
        /// Rule ID
        #[arg(long)]
        id: String,
    },

    /// List all rules
    List,

    /// Remove a rule
    Remove {
        /// Rule ID
        #[arg(long)]
        id: String,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let ctx = Context::new(cli.catalog, cli.config, cli.prayer_table)?;

    match cli.command {
        Commands::Check { window } => commands::check(&ctx, window).await?,
        Commands::Rescan { bookings } => commands::rescan(&ctx, bookings).await?,
        Commands::Expand { window } => commands::expand(&ctx, window).await?,
        Commands::Busy { window } => commands::busy(&ctx, window).await?,
        Commands::Catalog { command } => match command {
            CatalogCommands::Add { id, file } => commands::catalog_add(&ctx, id, file).await?,
            CatalogCommands::Get { id } => commands::catalog_get(&ctx, id).await?,
            CatalogCommands::List => commands::catalog_list(&ctx).await?,
            CatalogCommands::Remove { id } => commands::catalog_remove(&ctx, id).await?,
        },
    }

    Ok(())
}
