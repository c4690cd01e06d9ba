use crate::error::Result;
use crate::ingest::SourceKind;
use crate::ml::ModelingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

/// Main application configuration, read once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    /// Warehouse connection configuration
    #[serde(default)]
    pub warehouse: WarehouseConfig,

    /// Input file configuration
    #[serde(default)]
    #[validate(nested)]
    pub sources: SourcesConfig,

    /// Modeling configuration
    #[serde(default)]
    #[validate(nested)]
    pub modeling: ModelingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the embedded defaults, an optional file and
    /// the environment (prefix: CLAIMS_, separator: __)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_string_lossy().into_owned(),
            None => std::env::var("CLAIMS_CONFIG_PATH")
                .unwrap_or_else(|_| "config/local.toml".to_string()),
        };

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name(&config_path).required(path.is_some()))
            .add_source(
                config::Environment::with_prefix("CLAIMS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// Warehouse backend type
    #[serde(default)]
    pub backend: WarehouseBackend,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_dbname")]
    pub dbname: String,

    /// Analytic view read by the modeling path
    #[serde(default = "default_analytics_view")]
    pub analytics_view: String,

    /// Connect timeout (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            backend: WarehouseBackend::default(),
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            dbname: default_dbname(),
            analytics_view: default_analytics_view(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourcesConfig {
    /// Directory holding the three extracts
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_customer_a")]
    #[validate(nested)]
    pub customer_a: SourceFileConfig,

    #[serde(default = "default_customer_b")]
    #[validate(nested)]
    pub customer_b: SourceFileConfig,

    #[serde(default = "default_customer_c")]
    #[validate(nested)]
    pub customer_c: SourceFileConfig,
}

impl SourcesConfig {
    pub fn file_config(&self, kind: SourceKind) -> &SourceFileConfig {
        match kind {
            SourceKind::CustomerA => &self.customer_a,
            SourceKind::CustomerB => &self.customer_b,
            SourceKind::CustomerC => &self.customer_c,
        }
    }

    pub fn path_for(&self, kind: SourceKind) -> PathBuf {
        self.data_dir.join(&self.file_config(kind).file_name)
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            customer_a: default_customer_a(),
            customer_b: default_customer_b(),
            customer_c: default_customer_c(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SourceFileConfig {
    /// File name, also stamped into `source_file`
    pub file_name: String,

    /// Rows attempted between commits
    #[validate(range(min = 1))]
    pub commit_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_dbname() -> String {
    "insurance_analytics".to_string()
}

fn default_analytics_view() -> String {
    "insurance_staging_analytics.fct_claims".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_customer_a() -> SourceFileConfig {
    SourceFileConfig {
        file_name: "insurance_claims.csv".to_string(),
        commit_every: 100,
    }
}

fn default_customer_b() -> SourceFileConfig {
    SourceFileConfig {
        file_name: "AutoBi.csv".to_string(),
        commit_every: 100,
    }
}

fn default_customer_c() -> SourceFileConfig {
    SourceFileConfig {
        file_name: "car_insurance_claim.csv".to_string(),
        commit_every: 500,
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.warehouse.port, 5432);
        assert_eq!(config.warehouse.backend, WarehouseBackend::Postgres);
        assert_eq!(config.sources.customer_a.commit_every, 100);
        assert_eq!(config.sources.customer_c.commit_every, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedded_defaults_match_code_defaults() {
        let embedded: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let defaults = Config::default();
        assert_eq!(embedded.warehouse.dbname, defaults.warehouse.dbname);
        assert_eq!(
            embedded.sources.customer_b.file_name,
            defaults.sources.customer_b.file_name
        );
        assert_eq!(embedded.modeling.seed, defaults.modeling.seed);
        assert_eq!(embedded.modeling.test_size, defaults.modeling.test_size);
    }

    #[test]
    fn test_zero_commit_cadence_rejected() {
        let mut config = Config::default();
        config.sources.customer_b.commit_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_for_source() {
        let config = Config::default();
        assert_eq!(
            config.sources.path_for(SourceKind::CustomerC),
            PathBuf::from("data").join("car_insurance_claim.csv")
        );
    }
}
