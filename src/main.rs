//! CLI entry point for the tracked vector index.
//!
//! Provides commands for syncing a folder into the index, searching it,
//! and watching it for changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use trackdex::config::CONFIG_DIR;
use trackdex::tracking::document_key;
use trackdex::vector::VectorDimension;
use trackdex::{
    DocType, FileWalker, FolderWatcher, SearchFilter, Settings, TrackedIndex,
    generator_from_config, sync_folder,
};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Incremental semantic index over a folder
#[derive(Parser)]
#[command(
    name = "trackdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Incremental semantic index over a folder",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Set up .trackdex directory with default configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Sync a folder into the index, embedding only changed files
    Index {
        /// Folder to index (defaults to the workspace root)
        path: Option<PathBuf>,

        /// Show what would be indexed without indexing
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed documents by meaning
    Search {
        query: String,

        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,

        /// Only rank documents of this type
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Drop results below this similarity
        #[arg(long)]
        threshold: Option<f32>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a document from the index
    Remove {
        /// Document path as shown by search
        path: String,
    },

    /// Show index statistics
    Stats {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Watch a folder and re-index files as they change
    Watch {
        /// Folder to watch (defaults to the workspace root)
        path: Option<PathBuf>,
    },

    /// Display active settings
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Init { force } = &cli.command {
        let root = std::env::current_dir()?;
        let path = Settings::init_config_file(&root, *force)
            .map_err(|e| anyhow!("{e}"))?;
        println!("Created configuration file at: {}", path.display());
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    let settings = load_settings(cli.config.as_deref())?;
    init_logging(settings.debug);

    match cli.command {
        // Handled before settings are loaded
        Commands::Init { .. } => Ok(()),

        Commands::Config => {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(())
        }

        Commands::Index { path, dry_run } => {
            let root = resolve_root(&settings, path)?;
            let walker = FileWalker::new(settings.tracking.clone());

            if dry_run {
                let files: Vec<PathBuf> = walker.walk(&root).collect();
                for file in &files {
                    println!("{}", document_key(&root, file));
                }
                println!("{} files would be indexed", files.len());
                return Ok(());
            }

            let index = open_index(&settings)?;
            let start = Instant::now();
            let progress = create_progress_bar(walker.count_files(&root) as u64, "indexing")?;

            let report = sync_folder(&index, &walker, &root, |done, _| {
                progress.set_position(done as u64);
            })?;
            progress.finish_and_clear();

            println!(
                "Indexed {} files ({} unchanged, {} removed, {} failed) in {:.2}s",
                report.indexed,
                report.unchanged,
                report.removed,
                report.failed,
                start.elapsed().as_secs_f64()
            );
            if let Some(flush) = &report.flush {
                println!("{} vectors, {} structure", flush.vector_count, flush.structure_kind);
                if let Some(reason) = &flush.save_error {
                    eprintln!("Warning: index could not be saved: {reason}");
                }
            }
            index.close()?;
            Ok(())
        }

        Commands::Search {
            query,
            k,
            doc_type,
            threshold,
            json,
        } => {
            let index = open_index(&settings)?;
            let filter = SearchFilter {
                doc_type: doc_type.map(DocType::from),
                min_similarity: threshold,
            };
            let hits = index.search_filtered(&query, k, &filter);

            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No results for '{query}'");
            } else {
                for (rank, hit) in hits.iter().enumerate() {
                    println!(
                        "{:>2}. {:.3}  {}  [{}]",
                        rank + 1,
                        hit.similarity,
                        hit.path,
                        hit.doc_type
                    );
                }
            }
            Ok(())
        }

        Commands::Remove { path } => {
            let index = open_index(&settings)?;
            let key = path.trim_start_matches("./").replace('\\', "/");
            if !index.remove(&key) {
                bail!("'{key}' is not in the index");
            }
            index.close()?;
            println!("Removed {key}");
            Ok(())
        }

        Commands::Stats { json } => {
            let index = open_index(&settings)?;
            let stats = index.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }

            println!("Index:       {}", stats.index_dir.display());
            println!("Model:       {} ({} dimensions)", stats.model_name, stats.dimension);
            println!(
                "Structure:   {} (trained: {}, partitions: {})",
                stats.structure_kind, stats.trained, stats.partitions
            );
            println!("Vectors:     {}", stats.vector_count);
            println!("Tracked:     {} files", stats.tracked_files);
            println!("Generation:  {}", stats.generation);
            for (doc_type, count) in &stats.type_counts {
                println!("  {doc_type}: {count}");
            }
            Ok(())
        }

        Commands::Watch { path } => {
            let root = resolve_root(&settings, path)?;
            let walker = FileWalker::new(settings.tracking.clone());
            let index = Arc::new(open_index(&settings)?);

            let spinner = create_spinner("initial sync")?;
            let report = sync_folder(&index, &walker, &root, |_, _| {})?;
            spinner.finish_and_clear();
            println!(
                "Initial sync: {} indexed, {} unchanged, {} removed",
                report.indexed, report.unchanged, report.removed
            );

            let watcher = FolderWatcher::new(
                Arc::clone(&index),
                walker,
                &root,
                settings.tracking.debounce_ms,
            )?;
            println!("Watching {} (Ctrl+C to stop)", root.display());

            watcher
                .watch(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("failed to listen for Ctrl+C: {e}");
                    }
                })
                .await?;

            match Arc::try_unwrap(index) {
                Ok(index) => index.close()?,
                Err(index) => {
                    index.flush()?;
                }
            }
            Ok(())
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow!("Configuration error loading from {}: {e}", path.display())
        })?,
        None => {
            if Settings::workspace_root().is_none() {
                eprintln!("Warning: no {CONFIG_DIR} directory found, using defaults");
                eprintln!("Run 'trackdex init' to create one.");
            }
            Settings::load().map_err(|e| anyhow!("Configuration error: {e}"))?
        }
    };

    settings.validate().map_err(|reason| anyhow!(reason))?;
    Ok(settings)
}

/// Installs the stderr subscriber. `RUST_LOG` wins over the configured level.
fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_index(settings: &Settings) -> Result<TrackedIndex> {
    let dimension = VectorDimension::new(settings.index.dimension)?;
    let generator = generator_from_config(&settings.embedding, dimension)?;
    let index = TrackedIndex::open(settings, generator)?;
    Ok(index)
}

fn resolve_root(settings: &Settings, path: Option<PathBuf>) -> Result<PathBuf> {
    let root = match path {
        Some(path) => path,
        None => match &settings.workspace_root {
            Some(root) => root.clone(),
            None => std::env::current_dir()?,
        },
    };
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }
    root.canonicalize()
        .with_context(|| format!("resolving {}", root.display()))
}

/// Create a styled progress bar for file processing.
fn create_progress_bar(total: u64, message: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Create a spinner for indeterminate progress.
fn create_spinner(message: &str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    Ok(spinner)
}
