use anyhow::Result;
use colored::Colorize;
use request_inspector::{config, server};
use std::path::Path;
use tracing::info;

/// Execute the serve command
pub async fn execute(config_path: &Path) -> Result<()> {
    println!("{}", "Starting request inspector...".green());

    let cfg = config::load_config(config_path)?;
    info!(config = %config_path.display(), "Configuration loaded");

    server::start_server(cfg).await?;

    Ok(())
}
