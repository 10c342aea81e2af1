use crate::loyalty::ProgramConfig;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `REWARDS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Seeds the Configuration Store when no record exists yet.
    #[serde(default)]
    pub program: ProgramConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Periodic expiry sweep and annual tier rollover.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_maintenance_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "rewards-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_maintenance_enabled() -> bool {
    true
}
fn default_sweep_interval_secs() -> u64 {
    86_400
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: default_maintenance_enabled(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            maintenance: MaintenanceConfig::default(),
            program: ProgramConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional
    /// `rewards.toml` in the working directory.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("rewards").required(false))
            .add_source(
                config::Environment::with_prefix("REWARDS")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.maintenance.sweep_interval_secs, 86_400);
        assert!(config.program.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_program_section() {
        let json = r#"{
            "api": { "http_port": 3000 },
            "program": { "welcome_bonus_points": 75, "points_expiry_months": 6 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.api.http_port, 3000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.program.welcome_bonus_points, 75);
        assert_eq!(config.program.points_expiry_months, 6);
        assert_eq!(config.program.tiers.len(), 4);
    }
}
