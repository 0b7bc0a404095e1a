use anyhow::Result;
use colored::Colorize;
use request_inspector::config::{self, Config};
use std::path::Path;
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration (file plus environment overrides)
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&cfg)?;
    println!("{}", toml_string);

    info!("Configuration displayed successfully");
    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    for line in summary_lines(&cfg) {
        println!("  {}", line);
    }

    info!("Configuration validation successful");
    Ok(())
}

fn summary_lines(cfg: &Config) -> Vec<String> {
    let storage_dir = cfg
        .storage
        .base_path()
        .base_path()
        .join(cfg.storage.kind.cache_dir());

    vec![
        format!("Listen: {}:{}", cfg.server.host, cfg.server.port),
        format!("Storage: {}", storage_dir.display()),
        format!(
            "Capture: {}",
            if cfg.capture.enabled { "enabled" } else { "disabled" }
        ),
        format!("Route Prefix: {}", cfg.capture.route_prefix),
        format!("Excluded Routes: {}", cfg.capture.routes_to_exclude.len()),
        format!("Size Limit: {}KB", cfg.capture.size_limit_kb),
    ]
}
