use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod collector;
mod config;
mod crawl;
mod driver;
mod error;
mod extractor;
mod models;
mod patterns;
mod session;
mod sink;

#[cfg(test)]
mod fake_driver;

use driver::Driver;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// File receiving a copy of every log line
    #[arg(
        long,
        global = true,
        default_value = "follower_mail.log",
        env = "FOLLOWER_MAIL_LOG_FILE"
    )]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, collect the target's followers and extract emails from their bios
    Crawl(config::CrawlArgs),
    /// Extract validated emails from a local text file (stdin when omitted)
    Scan {
        /// Path to the text file
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Print a saved crawl report
    Report {
        /// Timestamp embedded in the report file name (YYYYMMDD_HHMMSS)
        timestamp: String,

        /// Directory holding the reports
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        /// File name prefix of the reports
        #[arg(long, default_value = config::DEFAULT_REPORT_PREFIX)]
        prefix: String,
    },
}

/// Logs to the console and appends the same lines, without colors, to `log_file`.
fn init_tracing(log_file: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("Failed to install the tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_file)?;

    match cli.command {
        Commands::Crawl(args) => crawl_command(args).await?,
        Commands::Scan { input } => scan_command(input)?,
        Commands::Report {
            timestamp,
            output_dir,
            prefix,
        } => {
            let report = sink::load_report(&output_dir, &prefix, &timestamp)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn crawl_command(args: config::CrawlArgs) -> Result<()> {
    // Missing credentials end the run before a browser is started.
    let config = config::build_config(&args)?;

    let browser = driver::WebDriverSession::connect(
        &config.webdriver_url,
        config.headless,
        config.element_timeout,
    )
    .await?;
    info!("WebDriver initialized successfully");

    let outcome = crawl::run_crawl(&browser, &config).await;

    match browser.quit().await {
        Ok(()) => info!("Browser session closed successfully"),
        Err(e) => error!("Error during cleanup: {}", e),
    }

    match outcome {
        Ok(outcome) => {
            info!(
                "Crawl of {} finished: {} emails written to {}",
                outcome.report.target(),
                outcome.report.emails().len(),
                outcome.path.display()
            );
            Ok(())
        }
        Err(e) => {
            error!("Script failed: {}", e);
            Err(e.into())
        }
    }
}

fn scan_command(input: Option<PathBuf>) -> Result<()> {
    let text = match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            buffer
        }
    };

    let emails = patterns::extract_valid_emails(&text);
    info!("Found {} valid email addresses", emails.len());
    println!("{}", serde_json::to_string_pretty(&emails)?);
    Ok(())
}
