//! Service configuration

use anyhow::{Context, Result};
use fleet_core::{CatalogConfig, LifecycleConfig, SyncConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration, from an optional file overlaid with `FLEET_*`
/// environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Directory holding one subdirectory per benchmark unit
    #[serde(default = "default_benchmarks_dir")]
    pub benchmarks_dir: PathBuf,

    #[serde(default = "default_unit_prefix")]
    pub unit_prefix: String,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Bearer token for /api routes; every /api call is refused when unset
    #[serde(default)]
    pub api_token: Option<String>,

    /// Explicit daemon socket or pipe; platform defaults otherwise
    #[serde(default)]
    pub docker_socket: Option<String>,

    #[serde(default = "default_compose_command")]
    pub compose_command: String,

    /// Variable carrying the host port override into `start`
    #[serde(default = "default_port_env_var")]
    pub port_env_var: String,

    /// Upstream repository of the benchmark catalog
    #[serde(default)]
    pub catalog_repo_url: Option<String>,

    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_ms: u64,

    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
}

fn default_benchmarks_dir() -> PathBuf {
    PathBuf::from("./benchmarks")
}

fn default_unit_prefix() -> String {
    "XBEN-".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_compose_command() -> String {
    "docker compose".to_string()
}

fn default_port_env_var() -> String {
    "PORT".to_string()
}

fn default_cpu_sample_ms() -> u64 {
    100
}

fn default_log_tail_lines() -> usize {
    200
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            benchmarks_dir: default_benchmarks_dir(),
            unit_prefix: default_unit_prefix(),
            api_port: default_api_port(),
            api_token: None,
            docker_socket: None,
            compose_command: default_compose_command(),
            port_env_var: default_port_env_var(),
            catalog_repo_url: None,
            cpu_sample_ms: default_cpu_sample_ms(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl FleetConfig {
    /// Load from `$FLEET_CONFIG` (default `fleet.toml`, optional) and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("FLEET_CONFIG").unwrap_or_else(|_| "fleet.toml".to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("FLEET"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        config
            .try_deserialize()
            .context("Invalid fleet configuration")
    }

    pub fn catalog_config(&self) -> CatalogConfig {
        CatalogConfig {
            root: self.benchmarks_dir.clone(),
            unit_prefix: self.unit_prefix.clone(),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig::from_command_line(&self.compose_command, self.port_env_var.clone())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            repo_url: self.catalog_repo_url.clone(),
            target_dir: self.benchmarks_dir.clone(),
            ..Default::default()
        }
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_ms)
    }
}
