//! Scan result rendering.

use colored::Colorize;
use osprey_core::engine::{ProviderOutcome, TargetReport};

/// Prints reports as pretty JSON on stdout.
pub fn print_json(reports: &[TargetReport]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(reports)?);
    Ok(())
}

/// Prints a human-readable summary per target.
pub fn print_table(reports: &[TargetReport]) {
    for report in reports {
        println!();
        println!(
            "{} {} ({}, {} ms)",
            "==".bold(),
            report.target.bold(),
            report.kind,
            report.elapsed_ms
        );

        if let Some(error) = &report.error {
            println!("  {} {}", "error:".red().bold(), error);
            continue;
        }

        for status in &report.providers {
            let cached = if status.from_cache { " (cached)" } else { "" };
            let line = match &status.outcome {
                ProviderOutcome::Success => format!(
                    "  {} {}{} [{} ms]",
                    "ok".green(),
                    status.provider,
                    cached,
                    status.elapsed_ms
                ),
                ProviderOutcome::Skipped {
                    missing_credentials,
                } => format!(
                    "  {} {} (missing {})",
                    "--".yellow(),
                    status.provider,
                    missing_credentials.join(", ")
                ),
                ProviderOutcome::Failed(error) => {
                    format!("  {} {}: {}", "!!".red(), status.provider, error)
                }
            };
            println!("{}", line);
        }

        let record = &report.record;
        if !record.resolved.ip.is_empty() {
            println!("  ip:        {}", record.resolved.ip.as_slice().join(", "));
        }
        if !record.resolved.mx.is_empty() {
            println!("  mx:        {}", record.resolved.mx.as_slice().join(", "));
        }
        if !record.resolved.ns.is_empty() {
            println!("  ns:        {}", record.resolved.ns.as_slice().join(", "));
        }
        if let Some(registrar) = &record.whois.registrar {
            println!("  registrar: {}", registrar);
        }
        if let Some(org) = &record.whois.org {
            println!("  org:       {}", org);
        }
        if let Some(created) = &record.whois.created {
            println!("  created:   {}", created.to_rfc3339());
        }
        if let Some(asn) = &record.network.asn {
            let name = record.network.asn_name.as_deref().unwrap_or("");
            println!("  asn:       {} {}", asn, name);
        }
        if let Some(city) = &record.network.city {
            let country = record.network.country.as_deref().unwrap_or("");
            println!("  location:  {} {}", city, country);
        }
        if let Some(score) = record.risk.score {
            let rendered = format!("{}", score);
            let colored_score = if record.risk.malicious {
                rendered.red().bold()
            } else {
                rendered.green()
            };
            println!("  risk:      {}/100", colored_score);
        }
        if !record.risk.categories.is_empty() {
            println!(
                "  categories: {}",
                record.risk.categories.as_slice().join(", ")
            );
        }
        if !report.has_data() {
            println!("  {}", "no provider returned data".dimmed());
        }
    }
}
