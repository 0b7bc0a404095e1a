use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{InspectorError, Result};
use crate::store::{FallbackBasePath, FixedBasePath, BasePath, StoreKind, StoreOptions};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Where and how snapshots are stored
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Application base directory; snapshots go to `<base>/cache/<kind>/`.
    /// Falls back to `..` (relative to the working directory) when unset.
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    /// Cache directory flavour (default: inspector)
    #[serde(default)]
    pub kind: StoreKind,

    /// Add a `_<n>` suffix instead of overwriting when two snapshots get the
    /// same token (default: false)
    #[serde(default)]
    pub unique_tokens: bool,
}

impl StorageConfig {
    pub fn base_path(&self) -> Box<dyn BasePath> {
        match &self.base_path {
            Some(path) => Box::new(FixedBasePath(path.clone())),
            None => Box::new(FallbackBasePath),
        }
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            unique_tokens: self.unique_tokens,
        }
    }
}

/// Request capture settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Capture requests at all (default: true)
    #[serde(default = "default_capture_enabled")]
    pub enabled: bool,

    /// JSON response bodies above this many KB are stored as "Purged" (default: 64)
    #[serde(default = "default_size_limit_kb")]
    pub size_limit_kb: u64,

    /// Largest request/response body buffered for capture (default: 2 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Path prefix of the inspector's own routes, never captured (default: "/_inspector")
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,

    /// URI fragments whose requests are not captured
    #[serde(default)]
    pub routes_to_exclude: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: default_capture_enabled(),
            size_limit_kb: default_size_limit_kb(),
            max_body_bytes: default_max_body_bytes(),
            route_prefix: default_route_prefix(),
            routes_to_exclude: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_capture_enabled() -> bool {
    true
}

fn default_size_limit_kb() -> u64 {
    crate::collector::DEFAULT_SIZE_LIMIT_KB
}

fn default_max_body_bytes() -> usize {
    2 * 1024 * 1024
}

fn default_route_prefix() -> String {
    "/_inspector".to_string()
}

/// Load configuration from an optional TOML file plus `INSPECTOR__*` environment overrides
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("INSPECTOR").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> Result<()> {
    if cfg.server.port == 0 {
        return Err(invalid("Server port must be greater than 0"));
    }

    if cfg.server.host.parse::<std::net::IpAddr>().is_err() {
        return Err(invalid(format!(
            "Server host '{}' is not a valid IP address",
            cfg.server.host
        )));
    }

    if cfg.capture.size_limit_kb == 0 {
        return Err(invalid("capture.size_limit_kb must be greater than 0"));
    }

    if cfg.capture.max_body_bytes == 0 {
        return Err(invalid("capture.max_body_bytes must be greater than 0"));
    }

    let prefix = &cfg.capture.route_prefix;
    if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
        return Err(invalid(format!(
            "capture.route_prefix '{}' must start with '/' and not end with '/'",
            prefix
        )));
    }

    if cfg.capture.routes_to_exclude.iter().any(|r| r.is_empty()) {
        return Err(invalid("capture.routes_to_exclude entries cannot be empty"));
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> InspectorError {
    InspectorError::Config(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.capture.size_limit_kb, 64);
        assert_eq!(cfg.capture.route_prefix, "/_inspector");
        assert_eq!(cfg.storage.kind, StoreKind::Inspector);
        assert!(!cfg.storage.unique_tokens);
    }

    #[test]
    fn test_validate_rejects_zero_size_limit() {
        let mut cfg = Config::default();
        cfg.capture.size_limit_kb = 0;

        match validate_config(&cfg) {
            Err(InspectorError::Config(message)) => assert!(message.contains("size_limit_kb")),
            other => panic!("expected a config error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_bad_route_prefix() {
        for prefix in ["_inspector", "/", "/_inspector/"] {
            let mut cfg = Config::default();
            cfg.capture.route_prefix = prefix.to_string();
            assert!(validate_config(&cfg).is_err(), "prefix {prefix:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_empty_exclusion() {
        let mut cfg = Config::default();
        cfg.capture.routes_to_exclude = vec!["/health".to_string(), String::new()];
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_host() {
        let mut cfg = Config::default();
        cfg.server.host = "localhost:80".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_load_config_from_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9000

[storage]
base_path = "/srv/app"
kind = "profiler"
unique_tokens = true

[capture]
size_limit_kb = 128
routes_to_exclude = ["/health"]
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.storage.kind, StoreKind::Profiler);
        assert_eq!(cfg.storage.base_path, Some(PathBuf::from("/srv/app")));
        assert!(cfg.storage.options().unique_tokens);
        assert_eq!(cfg.capture.size_limit_kb, 128);
        assert_eq!(cfg.capture.routes_to_exclude, vec!["/health"]);
        assert!(cfg.capture.enabled);
    }

    #[test]
    fn test_load_config_reports_validation_errors() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[capture]\nroute_prefix = \"inspector\"").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InspectorError>(),
            Some(InspectorError::Config(_))
        ));
        assert!(err.to_string().contains("route_prefix"));
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let cfg = load_config(Path::new("/nonexistent/inspector.toml")).unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(
            cfg.storage.base_path().base_path(),
            PathBuf::from("..")
        );
    }
}
