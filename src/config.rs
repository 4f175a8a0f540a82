use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::domain::RateTable;
use crate::error::{EtlError, Result};

/// Pipeline configuration, loaded from a TOML file. Every field has a
/// default matching the upstream extract, so an empty file is a valid
/// configuration for local development.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EtlConfig {
    pub storage: StorageConfig,
    pub lakehouse: LakehouseConfig,
    /// Currency-to-USD conversion table, keyed by currency code.
    pub rates: RateTable,
    /// Flat profit margin applied to every transaction.
    pub profit_margin: ProfitMargin,
    /// What to do with rows that violate the declared schema.
    pub schema_mode: SchemaMode,
}

/// Where the raw extract lives.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Storage account name. Only used to log the source URI.
    pub account: String,
    /// Container name. Only used to log the source URI.
    pub container: String,
    /// Path of the raw extract within the container.
    pub object_path: String,
    /// Local directory the container contents are mounted at.
    pub mount_root: PathBuf,
}

impl StorageConfig {
    /// ADLS-style URI of the raw extract, for log lines.
    pub fn object_uri(&self) -> String {
        format!(
            "abfss://{}@{}.dfs.core.windows.net/{}",
            self.container, self.account, self.object_path
        )
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            account: "dev".to_string(),
            container: "sales".to_string(),
            object_path: "raw/sales_data.csv".to_string(),
            mount_root: PathBuf::from("data"),
        }
    }
}

/// Destination catalog and the names of the four output tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LakehouseConfig {
    pub root: PathBuf,
    pub transactions_table: String,
    pub monthly_table: String,
    pub quarterly_table: String,
    pub regional_table: String,
}

impl Default for LakehouseConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lakehouse/Tables"),
            transactions_table: "sales_trans_tb".to_string(),
            monthly_table: "monthly_sales".to_string(),
            quarterly_table: "quarterly_sales".to_string(),
            regional_table: "region_performance".to_string(),
        }
    }
}

/// Flat profit margin as a fraction of USD revenue.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ProfitMargin(pub f64);

impl Default for ProfitMargin {
    fn default() -> Self {
        ProfitMargin(0.15)
    }
}

/// Policy for rows that fail schema enforcement. The header row is always
/// enforced strictly; this only governs cell-level type violations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Reject the offending row into the side channel and keep going.
    #[default]
    Permissive,
    /// Abort the run on the first violation.
    Strict,
}

impl EtlConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config: EtlConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rates.is_empty() {
            return Err(EtlError::Config("rate table is empty".to_string()));
        }
        if let Some((code, rate)) = self.rates.iter().find(|(_, r)| !r.is_finite() || *r <= 0.0) {
            return Err(EtlError::Config(format!(
                "rate for '{code}' must be a positive number, got {rate}"
            )));
        }
        let margin = self.profit_margin.0;
        if !(0.0..=1.0).contains(&margin) {
            return Err(EtlError::Config(format!(
                "profit_margin must be between 0 and 1, got {margin}"
            )));
        }
        for (name, value) in [
            ("transactions_table", &self.lakehouse.transactions_table),
            ("monthly_table", &self.lakehouse.monthly_table),
            ("quarterly_table", &self.lakehouse.quarterly_table),
            ("regional_table", &self.lakehouse.regional_table),
        ] {
            if value.trim().is_empty() {
                return Err(EtlError::Config(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}
