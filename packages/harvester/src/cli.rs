//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::{HarvestSource, HarvesterSettings};
use crate::error::Result;
use crate::harvester::Harvester;
use crate::http::{bytes_to_string, Fetcher, HttpFetcher};
use crate::indexer::DirectoryIndexer;
use crate::paging;
use crate::sniff;
use crate::transform::{RuleRegistry, XsltProcTransformer};
use crate::types::HarvestReport;

/// Default output directory for harvested records.
const DEFAULT_OUTPUT_DIR: &str = "harvested";

/// Simple URL harvester - Harvest metadata records from JSON, XML, RDF and STAC endpoints.
#[derive(Parser)]
#[command(name = "simpleurl-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harvest a source described by a YAML file.
    Harvest {
        /// Source configuration file
        config: PathBuf,

        /// Output directory for records (default: harvested/)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Detect the format of a URL or local file.
    Sniff {
        /// URL (http or https) or file path
        input: String,
    },

    /// Print the page URLs a paged source would be harvested with.
    Pages {
        /// First page URL, including the paging parameters
        url: String,

        /// Query parameter holding the page size
        #[arg(long)]
        size_param: String,

        /// Query parameter holding the page offset
        #[arg(long)]
        from_param: String,

        /// Total number of records
        #[arg(long)]
        total: Option<u64>,
    },
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            config,
            output,
            json,
        } => harvest_command(&config, output.as_deref(), json),
        Commands::Sniff { input } => sniff_command(&input),
        Commands::Pages {
            url,
            size_param,
            from_param,
            total,
        } => {
            for page in paging::sequence(&url, Some(&size_param), Some(&from_param), total) {
                println!("{page}");
            }
            Ok(())
        }
    }
}

/// Execute the harvest command.
fn harvest_command(config: &Path, output: Option<&Path>, json: bool) -> Result<()> {
    let source = HarvestSource::from_yaml_file(config)?;
    let settings = HarvesterSettings::from_env();
    let output_dir = output.unwrap_or_else(|| Path::new(DEFAULT_OUTPUT_DIR));

    if !json {
        println!(
            "{} {} into {}",
            style("Harvesting").bold(),
            style(&source.name).cyan(),
            style(output_dir.display()).green()
        );
        println!();
    }

    let fetcher = HttpFetcher::with_timeout(settings.http_timeout_secs)?;
    let indexer = DirectoryIndexer::new(output_dir)?;
    let mut harvester = Harvester::new(fetcher, indexer)
        .with_rules(RuleRegistry::new(
            settings.rules_dir.clone(),
            settings.fallback_rules_dir.clone(),
        ))
        .with_transformer(XsltProcTransformer::new(settings.xsltproc.clone()));

    // Create progress spinner
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message(format!("Harvesting {} URL(s)...", source.urls().len()));
    pb.enable_steady_tick(std::time::Duration::from_millis(100));

    let cancel = AtomicBool::new(false);
    let report = harvester.run(&source, &cancel);

    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &HarvestReport) {
    println!("  Records: {}", report.records_processed);
    println!(
        "  Added: {}  Updated: {}  Unchanged: {}",
        style(report.stats.added).green(),
        report.stats.updated,
        report.stats.unchanged
    );
    match report.removed {
        Some(removed) => println!("  Removed: {removed}"),
        None => println!("  Removed: {}", style("skipped").yellow()),
    }
    println!(
        "  URLs: {} ({} failed), pages: {}",
        report.urls_attempted, report.urls_failed, report.pages_processed
    );

    if !report.errors.is_empty() {
        println!("  Errors: {}", style(report.errors.len()).yellow().bold());
        for error in &report.errors {
            println!("    {} {error}", style("-").yellow());
        }
    }

    println!();
    let duration = report.finished_at - report.started_at;
    if report.cancelled {
        println!("{}", style("Harvest cancelled").yellow().bold());
    } else {
        println!(
            "{} in {}.{:03}s",
            style("Done").green().bold(),
            duration.num_seconds(),
            duration.num_milliseconds() % 1000
        );
    }
}

/// Execute the sniff command.
fn sniff_command(input: &str) -> Result<()> {
    let text = if input.starts_with("http://") || input.starts_with("https://") {
        let fetcher = HttpFetcher::with_timeout(HarvesterSettings::from_env().http_timeout_secs)?;
        bytes_to_string(&fetcher.fetch(input)?)
    } else {
        bytes_to_string(&std::fs::read(input)?)
    };

    println!("{}", sniff::classify(&text));
    Ok(())
}
