//! Runtime configuration with validation and defaults.
//!
//! Every section has a workable default, so the engine runs with no config
//! file at all. A TOML file fills in overrides section by section, and a few
//! environment variables override the file for containerized deployments.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cases::{Case, CaseCatalog};
use crate::types::TiePolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub fairness: FairnessConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec![],
            request_timeout_ms: 30_000,
        }
    }
}

/// Payout policy knobs. Product-owned values, never hard-coded in the
/// lifecycle managers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// House rake in basis points of the pool. 0 means the full pool pays out.
    pub rake_bps: u32,
    /// How battles with tied top scores resolve.
    pub tie_policy: TiePolicy,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            rake_bps: 0,
            tie_policy: TiePolicy::Split,
        }
    }
}

/// Shape limits on incoming create/join requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_tickets_cap: u32,
    pub max_cases_per_battle: u32,
    pub max_participants_cap: u32,
    pub max_client_seed_len: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tickets_cap: 1_000_000,
            max_cases_per_battle: 10,
            max_participants_cap: 8,
            max_client_seed_len: 64,
        }
    }
}

/// Deadlines applied to every ledger and storage call.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub call_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5_000,
        }
    }
}

/// Background expiry sweep over open pots.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
        }
    }
}

/// Where the case catalog comes from. `None` uses the builtin set.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CatalogConfig {
    pub cases_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub metrics_enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
        }
    }
}

/// On-disk shape of a catalog file: a list of `[[cases]]` tables.
#[derive(Debug, Deserialize)]
struct CasesFile {
    cases: Vec<Case>,
}

impl EngineConfig {
    /// Load from an optional TOML file, apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Short deadlines and no background sweep, for test setups.
    pub fn for_tests() -> Self {
        Self {
            gateway: GatewayConfig {
                call_timeout_ms: 500,
            },
            sweeper: SweeperConfig {
                enabled: false,
                interval_ms: 50,
            },
            ..Default::default()
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("CASEFORGE_BIND_ADDRESS") {
            self.api.bind_address = value;
        }
        if let Ok(value) = std::env::var("CASEFORGE_PORT") {
            if let Ok(port) = value.parse() {
                self.api.port = port;
            }
        }
        if let Ok(value) = std::env::var("CASEFORGE_LOG_LEVEL") {
            self.monitoring.log_level = value;
        }
        if let Ok(value) = std::env::var("CASEFORGE_RAKE_BPS") {
            if let Ok(rake) = value.parse() {
                self.fairness.rake_bps = rake;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.port == 0 {
            return Err(ConfigError::Invalid("api.port must be non-zero".to_string()));
        }
        if self.fairness.rake_bps > 10_000 {
            return Err(ConfigError::Invalid(format!(
                "fairness.rake_bps {} exceeds 10000 (100%)",
                self.fairness.rake_bps
            )));
        }
        if self.limits.max_tickets_cap == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_tickets_cap must be > 0".to_string(),
            ));
        }
        if self.limits.max_cases_per_battle == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_cases_per_battle must be > 0".to_string(),
            ));
        }
        if self.limits.max_participants_cap < 2 {
            return Err(ConfigError::Invalid(
                "limits.max_participants_cap must allow at least 2 seats".to_string(),
            ));
        }
        if self.gateway.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "gateway.call_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.sweeper.enabled && self.sweeper.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_ms must be > 0 when the sweeper is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the case catalog this deployment serves.
    pub fn load_catalog(&self) -> Result<CaseCatalog, ConfigError> {
        match &self.catalog.cases_path {
            None => Ok(CaseCatalog::builtin().clone()),
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let file: CasesFile = toml::from_str(&raw)?;
                CaseCatalog::new(file.cases)
                    .map_err(|e| ConfigError::Invalid(format!("catalog: {}", e)))
            }
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.call_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweeper.interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::for_tests().validate().is_ok());
    }

    #[test]
    fn test_rake_over_100_percent_rejected() {
        let mut config = EngineConfig::default();
        config.fairness.rake_bps = 10_001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[fairness]\nrake_bps = 250\ntie_policy = \"drawoff\"\n\n[api]\nport = 9090"
        )
        .unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.fairness.rake_bps, 250);
        assert_eq!(config.fairness.tie_policy, TiePolicy::DrawOff);
        assert_eq!(config.api.port, 9090);
        // Untouched sections keep their defaults.
        assert_eq!(config.gateway.call_timeout_ms, 5_000);
        assert_eq!(config.api.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_catalog_defaults_to_builtin() {
        let config = EngineConfig::default();
        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_catalog_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[[cases]]
id = "test-case"
name = "Test Case"
price = 100
items = [
    {{ name = "Common", value = 10, weight = 90 }},
    {{ name = "Rare", value = 500, weight = 10 }},
]
"#
        )
        .unwrap();

        let mut config = EngineConfig::default();
        config.catalog.cases_path = Some(file.path().display().to_string());

        let catalog = config.load_catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("test-case").unwrap().total_weight(), 100);
    }
}
