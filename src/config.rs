//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Database URLs can be overridden at runtime via `SOURCE_DATABASE_URL`
//! and `AUDIT_DATABASE_URL`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub source: DatabaseConfig,
    pub audit: DatabaseConfig,
    pub tenant: TenantConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TenantConfig {
    pub organization_id: i64,
    #[serde(default)]
    pub branch_id: Option<i64>,
}

/// Tuning knobs for the pipeline itself.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Maximum tolerated |valor_pago - valor_parcela| before the
    /// divergence finding fires.
    #[serde(default = "default_tolerance")]
    pub divergence_tolerance: Decimal,
    /// Rows per bulk INSERT statement.
    #[serde(default = "default_batch_size")]
    pub insert_batch_size: usize,
    /// Substring (case-insensitive) marking a bank account description
    /// as the designated house bank.
    #[serde(default = "default_house_bank_marker")]
    pub house_bank_marker: String,
}

fn default_max_connections() -> u32 {
    5
}

fn default_tolerance() -> Decimal {
    dec!(0.01)
}

fn default_batch_size() -> usize {
    200
}

fn default_house_bank_marker() -> String {
    "CONTA MOVIMENTO".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            divergence_tolerance: default_tolerance(),
            insert_batch_size: default_batch_size(),
            house_bank_marker: default_house_bank_marker(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, applying env overrides.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;

        if let Ok(url) = std::env::var("SOURCE_DATABASE_URL") {
            config.source.database_url = url;
        }
        if let Ok(url) = std::env::var("AUDIT_DATABASE_URL") {
            config.audit.database_url = url;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [source]
        database_url = "sqlite://legacy.db"

        [audit]
        database_url = "sqlite://audit.db"
        max_connections = 3

        [tenant]
        organization_id = 42
        branch_id = 10

        [pipeline]
        divergence_tolerance = 0.05
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.source.database_url, "sqlite://legacy.db");
        assert_eq!(cfg.source.max_connections, 5); // default
        assert_eq!(cfg.audit.max_connections, 3);
        assert_eq!(cfg.tenant.organization_id, 42);
        assert_eq!(cfg.tenant.branch_id, Some(10));
        assert_eq!(cfg.pipeline.divergence_tolerance, dec!(0.05));
        assert_eq!(cfg.pipeline.insert_batch_size, 200); // default
        assert_eq!(cfg.pipeline.house_bank_marker, "CONTA MOVIMENTO");
    }

    #[test]
    fn test_pipeline_section_optional() {
        let toml = r#"
            [source]
            database_url = "sqlite://a.db"
            [audit]
            database_url = "sqlite://b.db"
            [tenant]
            organization_id = 1
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.pipeline.divergence_tolerance, dec!(0.01));
        assert!(cfg.tenant.branch_id.is_none());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load("/nonexistent/config.toml");
        assert!(result.is_err());
    }
}
