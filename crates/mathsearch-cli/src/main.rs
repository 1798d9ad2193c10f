//! MathSearch CLI
//!
//! - `index`: load harvest files into a data directory
//! - `query`: run a `<mws:query>` file and print the answers as JSON
//! - `stats`: show index and store sizes

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mathsearch_cmml::parse_query;
use mathsearch_index::{EngineKind, Query, ResultWindow};
use mathsearch_storage::{HarvestStats, SearchService, ServiceConfig};

mod harvest_files;

#[derive(Parser)]
#[command(name = "mathsearch")]
#[command(author, version, about = "MathSearch: structural formula search over Content MathML")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (overrides the configuration)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index harvest files (or directories of `*.harvest` files).
    Index {
        /// Keep variable names instead of renaming them by first occurrence
        #[arg(long)]
        no_rename_ci: bool,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Run a `<mws:query>` file.
    Query {
        /// Matching engine (streaming or batch)
        #[arg(long)]
        engine: Option<EngineKind>,
        /// Override `limitmin`
        #[arg(long)]
        start: Option<i64>,
        /// Override `answsize`
        #[arg(long)]
        size: Option<i64>,
        file: PathBuf,
    },

    /// Print index statistics.
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    let mut config = match &cli.config {
        Some(path) => ServiceConfig::load(path)?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_path = dir.clone();
    }

    match cli.command {
        Commands::Index {
            no_rename_ci,
            paths,
        } => {
            if no_rename_ci {
                config.indexing.rename_ci = false;
            }
            cmd_index(config, &paths)
        }
        Commands::Query {
            engine,
            start,
            size,
            file,
        } => cmd_query(config, engine, start, size, &file),
        Commands::Stats => cmd_stats(config),
    }
}

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (stderr_layer, file_layer) = match log_file {
        Some(path) => {
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            (
                None,
                Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file))),
            )
        }
        None => (Some(fmt::layer().with_writer(std::io::stderr)), None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn cmd_index(config: ServiceConfig, inputs: &[PathBuf]) -> Result<()> {
    let paths = harvest_files::collect_harvest_paths(inputs)?;
    eprintln!(
        "{} {} harvest file(s) into {}",
        "Indexing".green().bold(),
        paths.len(),
        config.data_path.display()
    );

    let service = SearchService::open(config)?;
    let mut total = HarvestStats::default();
    let mut failed = 0usize;

    for (path, parsed) in harvest_files::parse_harvest_files(&paths) {
        let harvest = match parsed {
            Ok(harvest) => harvest,
            Err(err) => {
                warn!(path = %path.display(), error = %format!("{err:#}"), "skipping unreadable harvest");
                failed += 1;
                continue;
            }
        };
        // Each harvest is saved as it is indexed, including a failed one, so
        // an early return leaves the log and the index image in step.
        let stats = service
            .index_harvest(&harvest)
            .with_context(|| format!("indexing {}", path.display()))?;
        info!(
            path = %path.display(),
            exprs = stats.exprs,
            skipped = stats.skipped,
            "indexed harvest"
        );
        total.merge(stats);
    }

    eprintln!(
        "{} {} expressions ({} skipped), {} new subexpression links, {} documents",
        "ok".green().bold(),
        total.exprs,
        total.skipped,
        total.subexpressions,
        total.documents
    );
    if failed > 0 {
        eprintln!(
            "{} {} harvest file(s) could not be read",
            "warning:".yellow().bold(),
            failed
        );
    }
    Ok(())
}

fn cmd_query(
    config: ServiceConfig,
    engine: Option<EngineKind>,
    start: Option<i64>,
    size: Option<i64>,
    file: &Path,
) -> Result<()> {
    let xml = fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let request = parse_query(&xml).with_context(|| format!("parsing {}", file.display()))?;
    let window = ResultWindow::new(
        start.unwrap_or(request.limit_min),
        size.unwrap_or(request.answer_size),
        request.total_requested,
    )?;
    let expr = request
        .exprs
        .first()
        .with_context(|| format!("{} contains no query expression", file.display()))?;

    let engine = engine.unwrap_or(config.engine);
    let service = SearchService::open(config)?;
    let answers = service.execute_with(engine, Query::new(expr.clone(), window))?;
    println!("{}", serde_json::to_string_pretty(&answers)?);
    Ok(())
}

fn cmd_stats(config: ServiceConfig) -> Result<()> {
    let service = SearchService::open(config)?;
    let stats = service.stats();
    println!("{}", "MathSearch index".bold());
    println!("  trie nodes:   {}", stats.nodes);
    println!("  formulas:     {}", stats.formulas);
    println!("  symbols:      {}", stats.symbols);
    println!("  documents:    {}", stats.documents);
    println!("  occurrences:  {}", stats.occurrences);
    println!("  total hits:   {}", stats.total_hits);
    Ok(())
}
