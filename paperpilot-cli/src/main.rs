//! PaperPilot CLI: analyze a folder of research papers, then chat about
//! the results.

mod chat_repl;

use anyhow::Context;
use clap::Parser;
use paperpilot_core::{
    ChatSession, Orchestrator, OllamaProvider, PdfExtractor, PipelineConfig, RetryingProvider,
    RunState, Store, load_config,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// PaperPilot: local-LLM research paper analysis
#[derive(Parser, Debug)]
#[command(name = "paperpilot", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline over a folder of PDF papers
    Analyze {
        /// Directory scanned for PDF files (defaults to the configured
        /// papers directory)
        papers_dir: Option<PathBuf>,

        /// Directory for JSON and Markdown outputs
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory holding the SQLite database
        #[arg(long)]
        db_dir: Option<PathBuf>,

        /// Base URL of the completion endpoint
        #[arg(long)]
        base_url: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,
    },
    /// Ask questions about previously analyzed papers
    Chat {
        /// Directory holding the SQLite database
        #[arg(long)]
        db_dir: Option<PathBuf>,

        /// Base URL of the completion endpoint
        #[arg(long)]
        base_url: Option<String>,

        /// Model identifier
        #[arg(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref(), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?;
    apply_flags(&mut config, &cli.command);

    // Human-readable stdout plus a JSONL trace file.
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));
    let _ = std::fs::create_dir_all(&config.paths.log_dir);
    let file_appender = tracing_appender::rolling::daily(&config.paths.log_dir, "paperpilot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));
    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(json_layer)
        .init();

    match cli.command {
        Commands::Analyze { papers_dir, .. } => {
            let dir = papers_dir.unwrap_or_else(|| config.paths.papers_dir.clone());
            run_analyze(config, dir).await
        }
        Commands::Chat { .. } => run_chat(config).await,
    }
}

/// Fold command-line flags into the loaded configuration.
fn apply_flags(config: &mut PipelineConfig, command: &Commands) {
    let (output_dir, db_dir, base_url, model) = match command {
        Commands::Analyze {
            output_dir,
            db_dir,
            base_url,
            model,
            ..
        } => (output_dir, db_dir, base_url, model),
        Commands::Chat {
            db_dir,
            base_url,
            model,
        } => (&None, db_dir, base_url, model),
    };
    if let Some(dir) = output_dir {
        config.paths.data_dir = dir.clone();
    }
    if let Some(dir) = db_dir {
        config.paths.db_dir = dir.clone();
    }
    if let Some(url) = base_url {
        config.llm.base_url = url.clone();
    }
    if let Some(model) = model {
        config.llm.model = model.clone();
    }
}

async fn run_analyze(config: PipelineConfig, papers_dir: PathBuf) -> anyhow::Result<()> {
    let paths = discover_pdfs(&papers_dir)?;
    if paths.is_empty() {
        anyhow::bail!("No PDF files found in {}", papers_dir.display());
    }
    println!(
        "Analyzing {} paper(s) from {} with {}",
        paths.len(),
        papers_dir.display(),
        config.llm.model,
    );

    let store = Arc::new(Store::open(&config.paths.database_path())?);
    let provider = Arc::new(RetryingProvider::new(
        OllamaProvider::new(&config.llm)?,
        config.llm.retry.clone(),
    ));

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted; finishing the current step...");
            signal_cancel.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        store,
        provider,
        Arc::new(PdfExtractor),
        config.clone(),
        cancel,
    );
    let report = orchestrator.run(&paths).await;

    print_report(&report, &config);
    if report.state == RunState::Fatal {
        anyhow::bail!("Run aborted: database unavailable");
    }
    Ok(())
}

fn print_report(report: &paperpilot_core::RunReport, config: &PipelineConfig) {
    println!();
    println!(
        "Parsed:      {} ok, {} failed, {} with default metadata",
        report.parsing.succeeded.len(),
        report.parsing.failed.len(),
        report.parsing.defaulted.len(),
    );
    println!(
        "Summarized:  {} ok, {} failed",
        report.summarizing.succeeded.len(),
        report.summarizing.failed.len(),
    );
    match report.synthesis_id {
        Some(_) => println!(
            "Synthesized: {} paper(s); outputs in {}",
            report.synthesizing.succeeded.len(),
            config.paths.data_dir.display(),
        ),
        None => println!("Synthesized: failed"),
    }
    for failure in report
        .parsing
        .failed
        .iter()
        .chain(&report.summarizing.failed)
        .chain(&report.synthesizing.failed)
    {
        println!("  failed {}: {}", failure.item, failure.error);
    }
    println!("State: {:?}", report.state);
}

async fn run_chat(config: PipelineConfig) -> anyhow::Result<()> {
    let db_path = config.paths.database_path();
    if !db_path.exists() {
        println!("No analysis database found. Run `paperpilot analyze` first.");
        return Ok(());
    }
    let store = Arc::new(Store::open(&db_path)?);
    let provider = Arc::new(RetryingProvider::new(
        OllamaProvider::new(&config.llm)?,
        config.llm.retry.clone(),
    ));

    let session = ChatSession::new(store, provider, config)?;
    if session.is_empty() {
        println!("No papers have been analyzed yet. Run `paperpilot analyze` first.");
        return Ok(());
    }
    chat_repl::run(session).await
}

/// PDF files in the top level of the directory, sorted by name.
fn discover_pdfs(dir: &std::path::Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.with_context(|| format!("Cannot read {}", dir.display()))?;
        let path = entry.path();
        if path.is_file()
            && path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            paths.push(path.to_path_buf());
        }
    }
    Ok(paths)
}
