//! # devdash CLI
//!
//! The `devdash` binary extracts development activity from MySQL activity
//! databases, writes local JSON reports, and uploads denormalized documents
//! to an Elasticsearch-style backend.
//!
//! ## Usage
//!
//! ```bash
//! devdash --config ./config/devdash.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `devdash run` | Analyze every dashboard, write reports, upload documents |
//! | `devdash sources` | List configured dashboards and their schemas |
//! | `devdash mapping <type>` | Print the backend mapping of a document type |
//! | `devdash check` | Run consistency checks on the version control schemas |
//!
//! ## Examples
//!
//! ```bash
//! # Incremental run over all dashboards
//! devdash run --config ./config/devdash.toml
//!
//! # Rebuild one dashboard's collection from scratch
//! devdash run --dashboard Acme --full-refresh
//!
//! # Inspect the commit mapping
//! devdash mapping commit
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;

use devdash::check;
use devdash::config;
use devdash::ingest::{self, RunOptions};
use devdash::mapping;
use devdash::models::DocType;
use devdash::sources;

/// devdash: development activity dashboards from version control and code
/// review databases.
///
/// All commands except `mapping` read a TOML configuration file. See
/// `config/devdash.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "devdash",
    about = "Development activity extraction for search-backed dashboards",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/devdash.toml")]
    config: PathBuf,

    /// Log progress at INFO level.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log at DEBUG level, including rendered SQL.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze dashboards and publish the results.
    ///
    /// Each dashboard is processed in turn: version control and code review
    /// analysis, local reports (if `[output]` is configured), then a bulk
    /// upload (if `[backend]` is configured). A failing dashboard does not
    /// stop the others; the exit status is non-zero if any failed.
    Run {
        /// Only process this dashboard.
        #[arg(long)]
        dashboard: Option<String>,

        /// Delete each destination collection before uploading.
        #[arg(long)]
        full_refresh: bool,
    },

    /// List configured dashboards.
    Sources,

    /// Print the backend mapping for a document type.
    ///
    /// Types: `repo`, `commit`, `review`, `event`.
    Mapping {
        doc_type: DocType,
    },

    /// Check source schemas for rows a run would drop or count twice.
    Check,
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli);

    // Commands that don't require config
    if let Commands::Mapping { doc_type } = &cli.command {
        println!("{}", serde_json::to_string_pretty(&mapping::schema(*doc_type))?);
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load_config(&cli.config)?;

    let failed = match cli.command {
        Commands::Run {
            dashboard,
            full_refresh,
        } => {
            ingest::run(
                &cfg,
                &RunOptions {
                    dashboard,
                    full_refresh,
                },
            )
            .await?
        }
        Commands::Sources => {
            sources::list_sources(&cfg);
            0
        }
        Commands::Check => check::check_dashboards(&cfg).await?,
        Commands::Mapping { .. } => 0,
    };

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
