//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{info, warn};

use kbingest_core::{
    ChannelSink, ConfiguredCredentials, CrawlCoordinator, CrawlSummary, PipelineDeps,
};
use kbingest_crawler::HttpCrawler;
use kbingest_shared::{
    AppConfig, CancellationToken, CrawlRequest, CrawlStatus, IngestSettings, KnowledgeType,
    ProgressEvent, expand_home, init_config, load_config,
};
use kbingest_storage::{SourceRecord, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kbingest: crawl documentation into a local knowledge base.
#[derive(Parser)]
#[command(
    name = "kbingest",
    version,
    about = "Crawl documentation sources into a local, searchable knowledge base.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Register a source and crawl it.
    Crawl(CrawlArgs),

    /// Show one source and its crawl status.
    Status {
        /// Source ID printed by `crawl`.
        source_id: String,

        /// Database path (defaults to the configured one).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List all sources.
    Sources {
        /// Database path (defaults to the configured one).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct CrawlArgs {
    /// URL to crawl: a web page, a sitemap, or a text file such as llms.txt.
    url: String,

    /// Human-readable name for the source (defaults to the URL host).
    #[arg(short, long)]
    name: Option<String>,

    /// Maximum recursive crawl depth for web pages.
    #[arg(long)]
    max_depth: Option<u32>,

    /// Maximum concurrent fetches.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Skip code example extraction.
    #[arg(long)]
    no_code_examples: bool,

    /// LLM provider for code extraction, bypassing the configured one.
    #[arg(long)]
    provider: Option<String>,

    /// Knowledge type: technical or business.
    #[arg(long)]
    knowledge_type: Option<KnowledgeType>,

    /// Tag for the source (repeatable).
    #[arg(long = "tag")]
    tags: Vec<String>,

    /// Database path (defaults to the configured one).
    #[arg(long)]
    db: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kbingest=info",
        1 => "kbingest=debug",
        _ => "kbingest=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Crawl(args) => cmd_crawl(args).await,
        Command::Status { source_id, db } => cmd_status(&source_id, db).await,
        Command::Sources { db } => cmd_sources(db).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let config = load_config()?;
    let mut settings = IngestSettings::from(&config);
    if let Some(db) = &args.db {
        settings.db_path = db.clone();
    }

    let url = url::Url::parse(&args.url).map_err(|e| eyre!("invalid URL '{}': {e}", args.url))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(eyre!("unsupported URL scheme '{}': expected http or https", url.scheme()));
    }

    let request = CrawlRequest {
        source_url: url.to_string(),
        max_depth: Some(args.max_depth.unwrap_or(settings.max_depth)),
        max_concurrent: args.max_concurrent,
        extract_code_examples: Some(!args.no_code_examples),
        provider: args.provider,
        knowledge_type: args.knowledge_type.unwrap_or(config.defaults.knowledge_type),
        tags: args.tags,
        display_name: args.name,
    };

    let crawler = Arc::new(HttpCrawler::new()?);
    let storage = Arc::new(
        Storage::open(&settings.db_path)
            .await?
            .with_chunk_size(settings.chunk_size)
            .with_min_code_block_length(settings.min_code_block_length),
    );
    let source_id = storage.insert_source(&request).await?;
    storage
        .set_crawl_status(&source_id, CrawlStatus::InProgress)
        .await?;

    info!(
        url = %request.source_url,
        source_id = %source_id,
        db = %settings.db_path.display(),
        "crawling source"
    );

    let coordinator = CrawlCoordinator::new(
        PipelineDeps {
            crawler,
            documents: storage.clone(),
            code_extractor: storage.clone(),
            repository: storage.clone(),
            credentials: Arc::new(ConfiguredCredentials::from_config(&config.providers)),
        },
        &settings,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling crawl");
                cancel.cancel();
            }
        }
    });

    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);
    let renderer = tokio::spawn(async move {
        let progress = CliProgress::new();
        while let Some(event) = rx.recv().await {
            progress.render(&event);
        }
        progress.finish();
    });

    let result = coordinator
        .run(&request, &source_id, Arc::new(ChannelSink::new(tx)), &cancel)
        .await;
    ctrl_c.abort();
    if let Err(e) = renderer.await {
        warn!(error = %e, "progress renderer stopped unexpectedly");
    }

    let summary = result?;
    print_summary(&request, &summary);
    if !summary.status_verified {
        return Err(eyre!(
            "crawl finished but the completed status of {} could not be verified",
            summary.source_id
        ));
    }
    Ok(())
}

fn print_summary(request: &CrawlRequest, summary: &CrawlSummary) {
    println!();
    println!("  Crawl completed!");
    println!("  ID:            {}", summary.source_id);
    println!("  Name:          {}", request.display_name());
    println!("  Type:          {}", summary.crawl_type);
    println!("  Pages:         {}", summary.pages_crawled);
    if summary.pages_failed > 0 {
        println!("  Failed pages:  {}", summary.pages_failed);
    }
    println!("  Chunks:        {}", summary.chunks_stored);
    println!("  Code examples: {}", summary.code_examples);
    println!();
}

async fn open_storage(db: Option<PathBuf>) -> Result<Storage> {
    let path = match db {
        Some(path) => path,
        None => expand_home(&load_config()?.defaults.db_path),
    };
    Ok(Storage::open(&path).await?)
}

async fn cmd_status(source_id: &str, db: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(db).await?;
    let record = storage
        .get_source_record(source_id)
        .await?
        .ok_or_else(|| eyre!("no source with id '{source_id}'"))?;

    println!();
    println!("  ID:            {}", record.id);
    println!("  Name:          {}", record.display_name);
    println!("  URL:           {}", record.source_url);
    println!("  Status:        {}", record.crawl_status);
    println!("  Words:         {}", record.total_word_count);
    println!("  Chunks:        {}", record.chunk_count);
    println!("  Code examples: {}", record.code_example_count);
    println!("  Updated:       {}", record.updated_at);
    if let Some(summary) = &record.summary {
        println!();
        println!("  {summary}");
    }
    println!();
    Ok(())
}

async fn cmd_sources(db: Option<PathBuf>) -> Result<()> {
    let storage = open_storage(db).await?;
    let sources = storage.list_sources().await?;
    info!(count = sources.len(), "listing sources");

    if sources.is_empty() {
        println!("No sources yet. Add one with `kbingest crawl <URL>`.");
        return Ok(());
    }
    for record in &sources {
        println!("{}", source_line(record));
    }
    Ok(())
}

fn source_line(record: &SourceRecord) -> String {
    format!(
        "{}  {:<12} {:>5} chunks  {}  ({})",
        record.id, record.crawl_status, record.chunk_count, record.display_name, record.source_url
    )
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Draws the overall run progress as an indicatif bar.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn render(&self, event: &ProgressEvent) {
        self.bar.set_position(u64::from(event.progress));
        let message = match (event.processed_pages, event.total_pages) {
            (Some(done), Some(total)) => format!("{} [{done}/{total}] {}", event.stage, event.message),
            _ => format!("{} {}", event.stage, event.message),
        };
        self.bar.set_message(message);
        if let Some(error) = &event.error {
            self.bar.println(format!("  {}: {error}", event.stage));
        }
    }
}
