//! Configuration management for ogm.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`OGM__` prefix, `__` separator)
//! 2. Config file (`ogm.toml` by default)
//! 3. Defaults

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OgmConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub domain: DomainConfig,
}

/// Which store backend to connect to.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process graph, lost when the process exits.
    #[default]
    Memory,
    /// Remote Neo4j server over Bolt.
    Neo4j,
}

/// Store connection settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub neo4j: Neo4jSettings,
}

/// Neo4j connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Neo4jSettings {
    #[serde(default = "default_uri")]
    pub uri: String,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_password")]
    pub password: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

/// Domain access defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DomainConfig {
    /// Name of the domain (partition) within the store.
    #[serde(default = "default_domain_name")]
    pub name: String,

    /// Resolution depth used when materializing query results
    /// (-1 resolves until leaves or already visited objects).
    #[serde(default = "default_resolution_depth")]
    pub resolution_depth: i32,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "neo4j".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

fn default_domain_name() -> String {
    "DEFAULT-DOMAIN".to_string()
}

fn default_resolution_depth() -> i32 {
    -1
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            name: default_domain_name(),
            resolution_depth: default_resolution_depth(),
        }
    }
}

impl OgmConfig {
    /// Load configuration from `{file_prefix}.toml` (optional) and `OGM__`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("OGM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: OgmConfig = cfg.try_deserialize()?;
        tracing::debug!(
            backend = ?loaded.store.backend,
            domain = %loaded.domain.name,
            "Configuration loaded"
        );
        Ok(loaded)
    }
}
