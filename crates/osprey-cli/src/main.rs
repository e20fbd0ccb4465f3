//! Osprey CLI.
//!
//! Thin shell over the enrichment engine: target collection, flag
//! parsing, output rendering, and shell-friendly exit codes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use osprey_core::engine::{EnrichOptions, EnrichRequest, EnrichmentEngine, ProviderOutcome};
use osprey_core::record::TargetType;
use osprey_core::EngineConfig;
use osprey_observability::{init_logging_with_config, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod output;

/// Exit code when the scan completed but no provider produced data.
const EXIT_NO_DATA: i32 = 2;

#[derive(Parser)]
#[command(name = "osprey")]
#[command(version)]
#[command(about = "Modular OSINT reconnaissance: enrich targets across providers", long_about = None)]
struct Cli {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enrich one or more targets
    Scan {
        /// Targets to scan
        targets: Vec<String>,

        /// Read additional targets from a file, one per line
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,

        /// Target type: domain, ip, url or email
        #[arg(short = 't', long = "type", default_value = "domain")]
        target_type: String,

        /// Providers to run (comma-separated); default is all that
        /// support the target type
        #[arg(short, long, value_delimiter = ',')]
        providers: Vec<String>,

        /// Bypass the cache entirely
        #[arg(long)]
        no_cache: bool,

        /// Re-fetch and overwrite cached results
        #[arg(long)]
        refresh_cache: bool,

        /// Maximum concurrent provider fetches
        #[arg(long)]
        max_workers: Option<usize>,

        /// Per-provider timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Per-target deadline in seconds
        #[arg(long)]
        deadline: Option<u64>,

        /// Output format (table, json)
        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// List registered providers
    Providers,

    /// Inspect or clear the result cache
    Cache {
        #[command(subcommand)]
        action: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show entry and size counters
    Stats,
    /// Remove cached entries
    Clear {
        /// Only remove entries whose provider:target contains this text
        #[arg(long)]
        pattern: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("invalid output format: {}", s)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging_with_config(if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig {
            json_format: cli.json_logs,
            ..LoggingConfig::default()
        }
    });

    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan {
            targets,
            file,
            target_type,
            providers,
            no_cache,
            refresh_cache,
            max_workers,
            timeout,
            deadline,
            format,
        } => {
            let kind: TargetType = target_type.parse().map_err(anyhow::Error::msg)?;
            let targets = collect_targets(targets, file.as_deref())?;

            let registry = osprey_providers::default_registry()
                .map_err(|e| anyhow::anyhow!("failed to initialize providers: {}", e))?;
            let engine = Arc::new(EnrichmentEngine::new(config, registry));

            // ctrl-c cancels the scan; partial results are still printed
            let signal_engine = engine.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("{}", "interrupted, cancelling scan...".yellow());
                    signal_engine.cancel();
                }
            });

            let request = EnrichRequest {
                targets,
                kind,
                providers,
                options: EnrichOptions {
                    no_cache: no_cache.then_some(true),
                    refresh_cache: refresh_cache.then_some(true),
                    cache_ttl: None,
                    max_workers,
                    provider_timeout: timeout.map(Duration::from_secs),
                    target_deadline: deadline.map(Duration::from_secs),
                },
            };

            let reports = engine
                .enrich(request)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?;

            for report in &reports {
                for status in &report.providers {
                    if let ProviderOutcome::Skipped {
                        missing_credentials,
                    } = &status.outcome
                    {
                        eprintln!(
                            "{} {} skipped ({} not set)",
                            "warning:".yellow().bold(),
                            status.provider,
                            missing_credentials.join(", ")
                        );
                    }
                }
            }

            match format {
                OutputFormat::Json => output::print_json(&reports)?,
                OutputFormat::Table => output::print_table(&reports),
            }

            if !reports.iter().any(|r| r.has_data()) {
                std::process::exit(EXIT_NO_DATA);
            }
        }

        Commands::Providers => {
            let registry = osprey_providers::default_registry()
                .map_err(|e| anyhow::anyhow!("failed to initialize providers: {}", e))?;
            for provider in registry.iter() {
                let descriptor = provider.descriptor();
                let types: Vec<String> = descriptor
                    .target_types
                    .iter()
                    .map(|t| t.to_string())
                    .collect();
                let credentials = if descriptor.required_credentials.is_empty() {
                    "none".to_string()
                } else {
                    descriptor.required_credentials.join(", ")
                };
                let ready = if provider.missing_credentials().is_empty() {
                    "ready".green()
                } else {
                    "missing credentials".yellow()
                };
                println!(
                    "{:<12} types: {:<20} credentials: {:<20} [{}]",
                    descriptor.name.bold(),
                    types.join(","),
                    credentials,
                    ready
                );
            }
        }

        Commands::Cache { action } => {
            let registry = osprey_providers::default_registry()
                .map_err(|e| anyhow::anyhow!("failed to initialize providers: {}", e))?;
            let engine = EnrichmentEngine::new(config, registry);
            match action {
                CacheCommands::Stats => {
                    let stats = engine.cache().stats().await;
                    println!("entries: {}", stats.entries);
                    println!("bytes:   {}", stats.bytes);
                }
                CacheCommands::Clear { pattern } => {
                    let removed = engine.cache().clear(pattern.as_deref()).await;
                    println!("cleared {} entries", removed);
                }
            }
        }
    }

    Ok(())
}

/// Collects targets from arguments and an optional file, one per line.
/// Blank lines and `#` comments are ignored.
fn collect_targets(mut targets: Vec<String>, file: Option<&std::path::Path>) -> Result<Vec<String>> {
    if let Some(path) = file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read target file {}", path.display()))?;
        targets.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    if targets.is_empty() {
        bail!("no targets given; pass targets as arguments or with --file");
    }
    Ok(targets)
}
