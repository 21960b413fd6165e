use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bookmark_common::{config, AppConfig, PipelineConfig};
use bookmark_harvest::browser::BrowserlessPage;
use bookmark_harvest::pipeline::{Pipeline, SessionStatus};
use bookmark_harvest::report::{FanoutSink, TracingSink};
use bookmark_harvest::run_log::RunLog;
use bookmark_harvest::storage::JsonFileStorage;

#[derive(Parser)]
#[command(name = "bookmark-harvest", about = "Extract saved bookmarks into a JSON dataset")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scroll the bookmarks timeline and extend the dataset
    Run {
        /// Stop after this many new records
        #[arg(long, env = "HARVEST_TARGET_COUNT")]
        target: Option<usize>,

        /// Ignore prior output and overwrite it with this run only
        #[arg(long)]
        fresh: bool,

        /// Dataset path (default: {DATA_DIR}/bookmarks.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Summarize the persisted dataset
    Stats {
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            target,
            fresh,
            output,
        } => run(target, fresh, output).await,
        Command::Stats { output } => stats(output).await,
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("bookmark_harvest=info".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

async fn run(target: Option<usize>, fresh: bool, output: Option<PathBuf>) -> Result<()> {
    info!("Bookmark harvest starting...");

    let app = AppConfig::from_env()?;
    let mut config = PipelineConfig::from_env()?;
    if let Some(target) = target {
        config.target_count = target;
    }
    if fresh {
        config.resume = false;
    }

    let output = output.unwrap_or_else(|| app.output_path());
    let page = Arc::new(BrowserlessPage::new(
        &app,
        config.operation_timeout(),
        config.scroll_settle(),
    )?);
    let storage = Arc::new(JsonFileStorage::new(&output));
    let sink = FanoutSink::new()
        .with(Arc::new(TracingSink))
        .with(Arc::new(RunLog::new(&app.data_dir)));

    let pipeline = Pipeline::new(page.clone(), page, storage, Arc::new(sink));

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current iteration");
            stop_tx.send_replace(true);
        }
    });

    let summary = pipeline.run(&config, stop_rx).await?;
    println!("{summary}");
    println!("Output: {}", output.display());

    if summary.status == SessionStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn stats(output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| config::bookmarks_path(&config::data_dir()));
    let doc = JsonFileStorage::new(&path)
        .read_document()
        .await?
        .with_context(|| format!("No dataset at {}", path.display()))?;

    let mut authors: HashMap<&str, usize> = HashMap::new();
    for record in &doc.bookmarks {
        let handle = if record.author.handle.is_empty() {
            "<unknown>"
        } else {
            record.author.handle.as_str()
        };
        *authors.entry(handle).or_default() += 1;
    }
    let mut authors: Vec<_> = authors.into_iter().collect();
    authors.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    println!("\n=== Bookmark Dataset ===");
    println!("Path:       {}", path.display());
    println!("Bookmarks:  {}", doc.count);
    println!("Saved at:   {}", doc.timestamp.to_rfc3339());
    println!("Authors:    {}", authors.len());
    println!("\nTop authors:");
    for (handle, count) in authors.iter().take(10) {
        println!("  @{handle:<24} {count}");
    }
    Ok(())
}
