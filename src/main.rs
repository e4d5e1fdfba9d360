mod analysis;
mod config;
mod error;
mod estimate;
mod extract;
mod hints;
mod invoice;
mod llm;
mod pipeline;
mod reference;
mod store;
mod summary;
mod units;

use clap::{Parser, Subcommand};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use llm::cache::CachedClient;
use llm::{ChatClient, LlmClient};
use pipeline::{Document, Pipeline, Progress, RunReport};
use reference::ReferenceTable;
use std::path::{Path, PathBuf};
use store::ResultStore;
use summary::Summary;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Estimate the carbon footprint of purchase invoices
#[derive(Parser)]
#[command(name = "invoice-carbon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "invoice_carbon.toml")]
    config: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse invoice files and merge the results into the store
    Analyze {
        /// PDF, CSV or text invoices
        files: Vec<PathBuf>,

        /// Pasted invoice text, analysed as one more document
        #[arg(long)]
        text: Option<String>,
    },

    /// Print aggregates of the accumulated results
    Summary {
        /// Number of top contributors to list
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Write the accumulated results as CSV
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Clear the accumulated results
    Reset,

    /// Record a hand-entered row
    Manual {
        #[arg(long)]
        description: String,

        #[arg(long)]
        quantity: f64,

        /// kgCO2e per unit
        #[arg(long)]
        factor: f64,

        #[arg(long)]
        category: Option<String>,

        /// Invoice date, YYYY-MM-DD
        #[arg(long)]
        date: Option<String>,
    },

    /// Edit the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a dotted key, e.g. `llm.remote.model gpt-4o`
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // init tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Commands::Config {
        action: ConfigAction::Set { key, value },
    } = &cli.command
    {
        Config::set_value(&cli.config, key, value)?;
        println!("{key} = {value}");
        return Ok(());
    }

    let cfg = Config::load_or_default(&cli.config)?;
    let mut store = open_store(&cfg.store_path)?;

    match cli.command {
        Commands::Analyze { files, text } => analyze(&cfg, &mut store, &files, text).await?,
        Commands::Summary { top } => {
            let rows = store.rows()?;
            print!("{}", Summary::from_rows(&rows, top));
        }
        Commands::Export { output } => {
            let written = match output {
                Some(path) => {
                    let n = store.export_csv(std::fs::File::create(&path)?)?;
                    info!(path = %path.display(), rows = n, "Results exported");
                    n
                }
                None => store.export_csv(std::io::stdout().lock())?,
            };
            eprintln!("{written} rows exported");
        }
        Commands::Reset => {
            let removed = store.reset()?;
            println!("Removed {removed} rows");
        }
        Commands::Manual {
            description,
            quantity,
            factor,
            category,
            date,
        } => {
            let date = match date.as_deref() {
                Some(raw) => Some(
                    invoice::parse_invoice_date(raw)
                        .ok_or_else(|| format!("invalid date `{raw}`, expected YYYY-MM-DD"))?,
                ),
                None => None,
            };
            let row = store.add_manual(date, &description, quantity, factor, category.as_deref())?;
            println!(
                "Recorded {:.2} kgCO2e for {} [{}]",
                row.carbon_kg, row.description, row.category
            );
        }
        // handled before the config is loaded
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn open_store(path: &str) -> Result<ResultStore, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(ResultStore::open(path)?)
}

async fn analyze(
    cfg: &Config,
    store: &mut ResultStore,
    files: &[PathBuf],
    text: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if files.is_empty() && text.is_none() {
        return Err("nothing to analyse: pass files or --text".into());
    }

    // Refuse to start without a usable backend.
    let client = ChatClient::connect(&cfg.llm).await?;
    info!(provider = client.name(), model = client.model(), "Completion service ready");

    let reference = match ReferenceTable::load(&cfg.reference) {
        Ok(Some(table)) if table.is_empty() => {
            warn!(path = %cfg.reference.path, "Reference table has no usable rows");
            None
        }
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "Reference table unusable, every item will be estimated");
            None
        }
    };

    let mut documents = Vec::with_capacity(files.len() + 1);
    for path in files {
        match Document::from_path(path) {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unreadable file");
                eprintln!("Skipping {}: {e}", path.display());
            }
        }
    }
    if let Some(text) = text {
        documents.push(Document::from_text("pasted text", &text));
    }

    let report = if cfg.llm.cache {
        let cached = CachedClient::new(client);
        let report = run_with_progress(cfg, &cached, reference.as_ref(), &documents, store).await?;
        info!(entries = cached.len(), "Completion cache");
        report
    } else {
        run_with_progress(cfg, &client, reference.as_ref(), &documents, store).await?
    };

    println!(
        "Analysed {} documents, {} items: {} rows ({} new), {} unresolved",
        report.documents_processed,
        report.items_seen,
        report.rows.len(),
        report.rows_added,
        report.unresolved
    );
    for notice in &report.notices {
        println!("  ! {notice}");
    }
    Ok(())
}

async fn run_with_progress(
    cfg: &Config,
    llm: &dyn LlmClient,
    reference: Option<&ReferenceTable>,
    documents: &[Document],
    store: &mut ResultStore,
) -> Result<RunReport, Box<dyn std::error::Error>> {
    let pipeline = Pipeline::new(llm, reference, cfg.llm.max_document_chars)
        .with_staging_dir(&cfg.staging_dir);

    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")?
            .progress_chars("##-"),
    );
    let mut on_progress = |p: &Progress| {
        pb.set_position((p.fraction * 1000.0).round() as u64);
        pb.set_message(p.label.clone());
    };

    let report = pipeline.analyze(documents, store, &mut on_progress).await?;
    pb.finish_with_message("Done");
    Ok(report)
}
