use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::process;

use cache_failure_report::display::DisplayManager;
use cache_failure_report::logging::init_logging;
use cache_failure_report::persist::write_report_set;
use cache_failure_report::source::item::decode_item;
use cache_failure_report::{CacheReportAnalyzer, Config, JsonlPageFetcher, PageFetcher, PriorityClassifier, TimeRange};

#[derive(Parser)]
#[command(name = "cache-failure-report")]
#[command(about = "Classify cache misses of test-automation steps and report them by command and package")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan step records, classify every cache miss and write the reports
    Report {
        /// Start of the window, civil time (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// End of the window, civil time (YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Read records from a JSON Lines export instead of the scan endpoint
        #[arg(long, conflicts_with = "endpoint")]
        input: Option<PathBuf>,
        /// Scan endpoint URL (overrides configuration)
        #[arg(long)]
        endpoint: Option<String>,
        /// Directory for report artifacts
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Fill breakdown reasons with category descriptions
        #[arg(long)]
        diagnostics: bool,
        /// Keep step identifiers per category in the reports
        #[arg(long)]
        capture_step_ids: bool,
        /// Similarity threshold between 0 and 1
        #[arg(long)]
        threshold: Option<f64>,
        /// Show top N commands
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Classify a single record read from FILE or stdin and print the diagnostic
    Classify {
        /// File holding one JSON item, `-` for stdin
        file: Option<PathBuf>,
        /// Similarity threshold between 0 and 1
        #[arg(long)]
        threshold: Option<f64>,
    },
}

impl Commands {
    fn json_output(&self) -> bool {
        match self {
            Commands::Report { json, .. } => *json,
            Commands::Classify { .. } => true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = cli.command.json_output();

    match run(cli.command).await {
        Ok(()) => Ok(()),
        Err(e) => handle_error(e, json),
    }
}

async fn run(command: Commands) -> Result<()> {
    let mut config = Config::load()?;

    match command {
        Commands::Report {
            start,
            end,
            input,
            endpoint,
            output_dir,
            json,
            diagnostics,
            capture_step_ids,
            threshold,
            limit,
        } => {
            if let Some(threshold) = threshold {
                config.classifier.similarity_threshold = threshold;
            }
            if endpoint.is_some() {
                config.source.endpoint = endpoint;
            }
            if let Some(dir) = output_dir {
                config.output.directory = dir;
            }
            config.report.diagnostics |= diagnostics;
            config.report.capture_step_ids |= capture_step_ids;
            config.validate()?;

            let _guard = init_logging(&config.logging, &config.paths.log_directory)?;

            let range = TimeRange::from_optional(start.as_deref(), end.as_deref())?;
            let fetcher = build_fetcher(&config, input)?;
            let analyzer = CacheReportAnalyzer::from_config(fetcher, &config);

            let reports = analyzer.aggregate_report(range.as_ref()).await?;
            let written = write_report_set(&reports, &config.output.directory, config.output.json_pretty)
                .with_context(|| format!("Failed to write reports to {}", config.output.directory.display()))?;

            DisplayManager::new().display_report_set(&reports, limit, json);
            if !json {
                println!("📁 {} files written to {}", written.len(), config.output.directory.display());
            }
            Ok(())
        }
        Commands::Classify { file, threshold } => {
            if let Some(threshold) = threshold {
                config.classifier.similarity_threshold = threshold;
            }
            config.validate()?;
            let _guard = init_logging(&config.logging, &config.paths.log_directory)?;

            let raw = read_input(file)?;
            let item: serde_json::Value = serde_json::from_str(&raw).context("Input is not valid JSON")?;
            let record = match decode_item(&item) {
                Ok(record) => record,
                Err(malformed) => bail!("Malformed record: {}", malformed.reason),
            };

            let result = PriorityClassifier::new(config.classifier.similarity_threshold)
                .with_diagnostics(true)
                .classify(&record);
            DisplayManager::new().display_classification(&result);
            Ok(())
        }
    }
}

fn build_fetcher(config: &Config, input: Option<PathBuf>) -> Result<Box<dyn PageFetcher>> {
    if let Some(path) = input {
        return Ok(Box::new(JsonlPageFetcher::new(path, config.source.page_size)));
    }

    match &config.source.endpoint {
        #[cfg(feature = "http")]
        Some(endpoint) => {
            let fetcher = cache_failure_report::HttpScanFetcher::new(
                endpoint.clone(),
                config.source.table_name.clone(),
                config.source.page_size,
                std::time::Duration::from_secs(config.source.timeout_secs),
                config.filter.clone(),
            )?;
            Ok(Box::new(fetcher))
        }
        #[cfg(not(feature = "http"))]
        Some(_) => bail!("HTTP support is disabled in this build; use --input"),
        None => bail!("No record source: pass --input FILE or configure an endpoint (CACHE_REPORT_ENDPOINT)"),
    }
}

fn read_input(file: Option<PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read stdin")?;
            Ok(raw)
        }
    }
}

fn handle_error(e: anyhow::Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    } else {
        eprintln!("❌ Error: {:#}", e);
    }
    process::exit(1);
}
