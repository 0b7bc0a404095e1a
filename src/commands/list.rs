//! List command
//!
//! Show the newest captured requests from the snapshot store.

use anyhow::Result;
use clap::Parser;
use colored::{ColoredString, Colorize};
use request_inspector::config;
use request_inspector::handlers::inspector_api::ActivitySummary;
use std::path::Path;

/// List captured requests
#[derive(Debug, Clone, Parser)]
pub struct ListArgs {
    /// Number of requests to show, 0 for all
    #[arg(short, long, default_value = "10")]
    pub last: usize,

    /// Output format (text, json)
    #[arg(short = 'f', long, default_value = "text")]
    pub format: String,
}

/// Execute the list command
pub fn execute(config_path: &Path, args: ListArgs) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let store = super::open_store(&cfg)?;

    let summaries: Vec<ActivitySummary> = store
        .recent(args.last)?
        .iter()
        .map(ActivitySummary::from)
        .collect();

    if summaries.is_empty() {
        println!(
            "{}",
            format!("No captured requests in {}", store.dir().display()).yellow()
        );
        return Ok(());
    }

    match args.format.as_str() {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
        _ => display_text(&summaries),
    }

    Ok(())
}

fn display_text(summaries: &[ActivitySummary]) {
    println!("{}", format!("{} captured requests", summaries.len()).bold());
    println!();

    for summary in summaries {
        let status = summary
            .status
            .map(status_colored)
            .unwrap_or_else(|| "---".dimmed());
        let duration = summary
            .duration
            .map(|ms| format!("{:.0}ms", ms))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{}  {}  {} {:<7} {}  {} ({} events)",
            summary.token.cyan(),
            summary.date.as_deref().unwrap_or("-").dimmed(),
            status,
            summary.method.as_deref().unwrap_or("-"),
            summary.uri.as_deref().unwrap_or("-"),
            duration,
            summary.events,
        );
    }
}

fn status_colored(status: u16) -> ColoredString {
    let text = status.to_string();
    match status {
        200..=299 => text.green(),
        300..=399 => text.cyan(),
        400..=499 => text.yellow(),
        500..=599 => text.red().bold(),
        _ => text.normal(),
    }
}
