//! Configuration system for jxcube.
//!
//! TOML-based configuration with global defaults and per-cluster overrides.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{JxError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct JxConfig {
    /// Global defaults applied to all clusters unless overridden.
    pub defaults: GlobalDefaults,

    /// Per-cluster configuration (keyed by cluster name).
    #[serde(default)]
    pub clusters: HashMap<String, ClusterConfig>,
}

/// Global default settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalDefaults {
    pub query: QueryConfig,
    pub search: SearchConfig,
    pub metadata: MetadataCacheConfig,
}

/// Query compilation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Cap on open terms buckets per edge (default: 1000).
    pub default_edge_limit: usize,
    /// Default row limit for groupby/list output when not in the request.
    pub default_row_limit: u64,
}

/// Search transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Search timeout in milliseconds (default: 30000).
    pub timeout_ms: u64,
    /// Maximum concurrent searches per cluster (default: 16).
    pub max_in_flight: usize,
}

/// Column metadata cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetadataCacheConfig {
    /// Cache TTL in seconds (default: 3600).
    pub ttl_secs: u64,
    /// Maximum cached tables (default: 1000).
    pub max_size: usize,
}

/// Per-cluster configuration (can override globals).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub url: String,
    /// Wire dialect: "5.x" (default) or "1.x".
    pub version: Option<String>,
    pub query: Option<QueryConfig>,
    pub search: Option<SearchConfig>,
    pub metadata: Option<MetadataCacheConfig>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_edge_limit: 1000,
            default_row_limit: 10_000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_in_flight: 16,
        }
    }
}

impl Default for MetadataCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_size: 1000,
        }
    }
}

impl JxConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| JxError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| JxError::Config(format!("failed to parse config: {e}")))
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| JxError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `JXCUBE_CONFIG` environment variable
    /// 2. `./jxcube.toml` (current directory)
    /// 3. `~/.config/jxcube/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("JXCUBE_CONFIG") {
            if let Ok(cfg) = Self::from_file(&path) {
                tracing::info!(path = %path, "loaded config from JXCUBE_CONFIG");
                return cfg;
            }
        }

        if let Ok(cfg) = Self::from_file("jxcube.toml") {
            tracing::info!("loaded config from ./jxcube.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("jxcube").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Get resolved config for a specific cluster (merges global defaults).
    pub fn for_cluster(&self, name: &str) -> ResolvedClusterConfig {
        let cluster = self.clusters.get(name);
        ResolvedClusterConfig::merge(&self.defaults, cluster)
    }
}

/// Fully resolved configuration for a cluster (no Option fields).
#[derive(Debug, Clone)]
pub struct ResolvedClusterConfig {
    pub url: String,
    pub version: String,
    pub query: QueryConfig,
    pub search: SearchConfig,
    pub metadata: MetadataCacheConfig,
}

impl ResolvedClusterConfig {
    /// Built-in defaults pointed at the given URL.
    pub fn from_url(url: String) -> Self {
        Self {
            url,
            version: "5.x".to_string(),
            query: QueryConfig::default(),
            search: SearchConfig::default(),
            metadata: MetadataCacheConfig::default(),
        }
    }

    fn merge(defaults: &GlobalDefaults, override_cfg: Option<&ClusterConfig>) -> Self {
        match override_cfg {
            Some(cluster) => Self {
                url: cluster.url.clone(),
                version: cluster.version.clone().unwrap_or_else(|| "5.x".to_string()),
                query: cluster.query.clone().unwrap_or_else(|| defaults.query.clone()),
                search: cluster
                    .search
                    .clone()
                    .unwrap_or_else(|| defaults.search.clone()),
                metadata: cluster
                    .metadata
                    .clone()
                    .unwrap_or_else(|| defaults.metadata.clone()),
            },
            None => Self {
                url: String::new(),
                version: "5.x".to_string(),
                query: defaults.query.clone(),
                search: defaults.search.clone(),
                metadata: defaults.metadata.clone(),
            },
        }
    }
}
