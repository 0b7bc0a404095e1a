//! Show command
//!
//! Display one captured request, or one part of it.

use anyhow::{bail, Result};
use clap::Parser;
use colored::Colorize;
use request_inspector::config;
use request_inspector::snapshot::{ResponsePayload, StoredSnapshot};
use serde_json::Value;
use std::path::Path;

/// Display a captured request
#[derive(Debug, Clone, Parser)]
pub struct ShowArgs {
    /// Snapshot token, or `latest`
    pub token: String,

    /// Only print one part: request, response, events, timeline
    #[arg(short, long)]
    pub section: Option<String>,
}

/// Execute the show command
pub fn execute(config_path: &Path, args: ShowArgs) -> Result<()> {
    let cfg = config::load_config(config_path)?;
    let store = super::open_store(&cfg)?;
    let stored = store.resolve(&args.token)?;

    match args.section.as_deref() {
        None => display_overview(&stored),
        Some(section) => {
            let value = section_value(&stored, section)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn section_value(stored: &StoredSnapshot, section: &str) -> Result<Value> {
    let snapshot = &stored.snapshot;
    let value = match section {
        "request" => serde_json::to_value(&snapshot.request)?,
        "response" => serde_json::to_value(&snapshot.response)?,
        "events" => serde_json::to_value(&snapshot.events)?,
        "timeline" => serde_json::to_value(&snapshot.timeline)?,
        other => bail!(
            "Unknown section '{}' (expected request, response, events or timeline)",
            other
        ),
    };
    Ok(value)
}

fn display_overview(stored: &StoredSnapshot) {
    let snapshot = &stored.snapshot;

    println!("{} {}", "Snapshot".bold(), stored.timestamp.cyan());
    println!();

    if let Some(request) = &snapshot.request {
        println!("{}", "Request:".bold());
        println!("  {} {}", request.method.green(), request.uri);
        if let Some(ip) = &request.ip {
            println!("  Client: {}", ip);
        }
        if let Some(action) = &request.controller_action {
            println!("  Route: {}", action);
        }
        println!("  Headers: {}", request.headers.len());
        println!();
    }

    if let Some(response) = &snapshot.response {
        println!("{}", "Response:".bold());
        println!("  Status: {}", response.status);
        let payload = match &response.payload {
            ResponsePayload::Json(_) => "JSON".to_string(),
            ResponsePayload::Purged => "Purged".yellow().to_string(),
            ResponsePayload::Redirected(target) => format!("Redirected to {}", target),
            ResponsePayload::Html => "HTML Response".to_string(),
        };
        println!("  Payload: {}", payload);
        if let Some(duration) = response.duration {
            println!("  Duration: {:.0}ms", duration);
        }
        println!();
    }

    println!("{}", format!("Events ({}):", snapshot.events.len()).bold());
    for event in &snapshot.events {
        let marker = if event.core { "core".dimmed() } else { "app".blue() };
        println!("  [{}] {}", marker, event.name);
    }
    println!();

    let timeline = &snapshot.timeline;
    println!(
        "{}",
        format!("Timeline ({} timers):", timeline.timeline.len()).bold()
    );
    for (name, entry) in &timeline.timeline {
        println!(
            "  {:<32} {:>10.2}ms  {} / {}",
            name,
            entry.duration,
            entry.section.dimmed(),
            entry.category
        );
    }
}
