//! webharvest command-line entry point
//!
//! Loads configuration and a rule set, then runs the extraction pipeline over
//! the given sources, writing records as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::warn;

use webharvest_lib::domain::{Sink, SourceRef};
use webharvest_lib::extraction::load_rule_set;
use webharvest_lib::infrastructure::{
    init_logging_with_config, ConfigManager, DefaultFetcher, HttpFetcher, JsonLinesSink,
    ReportWriter,
};
use webharvest_lib::parsing::HtmlParser;
use webharvest_lib::pipeline::{LogObserver, PipelineCoordinator};

#[derive(Parser, Debug)]
#[command(name = "webharvest", version, about = "Extract structured records from web pages")]
struct Cli {
    /// Rule set file (JSON)
    #[arg(short, long)]
    rules: PathBuf,

    /// Config file (TOML or JSON); defaults to the per-user config if present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write JSON lines here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a plain-text run report to this file, or into this directory
    #[arg(long)]
    report: Option<PathBuf>,

    /// Documents processed at the same time
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Queue in-scope links found on fetched pages
    #[arg(long)]
    follow_links: bool,

    /// Stop queueing discovered links after this many documents
    #[arg(short = 'n', long)]
    max_documents: Option<usize>,

    /// File with one source per line
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// URLs or file paths to process
    sources: Vec<String>,
}

/// Sources from the command line followed by those in the input file
async fn collect_sources(cli: &Cli) -> Result<Vec<SourceRef>> {
    let mut sources: Vec<SourceRef> = cli.sources.iter().map(SourceRef::new).collect();
    if let Some(path) = &cli.input {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input file {path:?}"))?;
        sources.extend(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(SourceRef::new),
        );
    }
    Ok(sources)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match &cli.config {
        Some(path) => ConfigManager::with_file(path),
        None => ConfigManager::new(),
    };
    let mut config = manager.load_config()?;
    if let Some(concurrency) = cli.concurrency {
        config.pipeline.concurrency = concurrency;
    }
    if cli.follow_links {
        config.pipeline.follow_links = true;
    }
    if cli.max_documents.is_some() {
        config.pipeline.max_documents = cli.max_documents;
    }
    config.validate()?;

    init_logging_with_config(&config.logging)?;

    let rules = load_rule_set(&cli.rules)
        .await
        .with_context(|| format!("Invalid rule set {:?}", cli.rules))?;

    let sources = collect_sources(&cli).await?;
    if sources.is_empty() {
        bail!("No sources given; pass URLs or paths, or use --input");
    }

    let parser = HtmlParser::new(config.parser.clone()).context("Invalid parser options")?;
    let fetcher = Arc::new(DefaultFetcher::new(HttpFetcher::new(config.http.clone())?));
    let sink: Arc<dyn Sink> = match &cli.output {
        Some(path) => Arc::new(JsonLinesSink::create(path).await?),
        None => Arc::new(JsonLinesSink::stdout()),
    };

    let mut coordinator = PipelineCoordinator::new(
        fetcher,
        parser,
        Arc::new(rules),
        sink,
        config.pipeline.clone(),
    )
    .with_observer(Arc::new(LogObserver));
    if let Some(path) = &cli.report {
        let writer = ReportWriter::for_target(path, &sources[0]);
        coordinator = coordinator.with_observer(Arc::new(writer));
    }

    let cancel = coordinator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupted, finishing in-flight documents");
            cancel.cancel();
        }
    });

    coordinator.run(sources).await;
    Ok(())
}
