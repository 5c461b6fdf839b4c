use clap::{Parser, ValueEnum};
use crawlflow::output::{write_csv_file, write_json_file};
use crawlflow::{ChromeDriver, ChromeOptions, Configuration, CrawlRun};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "crawlflow", about = "Run a saved crawler configuration")]
struct Cli {
    /// Crawler configuration JSON file
    #[arg(short, long)]
    config: PathBuf,

    /// Output file; defaults to <configuration name>.<format>
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Cap the run at N pages (useful for test runs)
    #[arg(long)]
    max_pages: Option<u32>,

    /// Stop the crawl after this many seconds, keeping partial results
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Run Chrome with a visible window
    #[arg(long)]
    headed: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();

    let mut config = Configuration::load_file(&cli.config)?;
    if let Some(max_pages) = cli.max_pages {
        config.max_pages = Some(max_pages);
    }
    info!(
        "loaded configuration '{}' for {}",
        config.name, config.base_url
    );

    let options = ChromeOptions {
        headless: !cli.headed,
        ..Default::default()
    };
    let driver = ChromeDriver::launch(&options)?;

    let output = cli.output.unwrap_or_else(|| {
        let extension = match cli.format {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        };
        PathBuf::from(format!("{}.{}", config.name, extension))
    });

    let mut run = CrawlRun::start(driver, config).await?;
    if let Some(secs) = cli.deadline_secs {
        run = run.with_deadline(Duration::from_secs(secs));
    }

    while let Some(batch) = run.next_page().await? {
        info!(
            "page {}: extracted {} items",
            batch.page_number,
            batch.results.len()
        );
    }

    let summary = run.summary();
    match cli.format {
        OutputFormat::Json => write_json_file(&output, run.results())?,
        OutputFormat::Csv => write_csv_file(&output, run.results())?,
    }
    run.shutdown().await?;

    info!(
        "run {} finished: {} items over {} pages ({} failed), saved to {}",
        summary.run_id,
        summary.total_items,
        summary.pages_visited,
        summary.failed,
        output.display()
    );

    Ok(())
}
