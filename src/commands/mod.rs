//! Command implementations for the CLI
//!
//! This module contains the implementation of all CLI commands:
//! - serve: Run the inspector API around the demo app
//! - list: List captured requests
//! - show: Display one captured request
//! - config: Configuration display and validation

pub mod config;
pub mod list;
pub mod serve;
pub mod show;

use anyhow::Result;
use request_inspector::config::Config;
use request_inspector::store::SnapshotStore;

/// Open the snapshot store described by the configuration
pub(crate) fn open_store(cfg: &Config) -> Result<SnapshotStore> {
    Ok(SnapshotStore::with_options(
        cfg.storage.base_path().as_ref(),
        cfg.storage.kind,
        cfg.storage.options(),
    )?)
}
