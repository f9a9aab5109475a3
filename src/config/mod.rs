//! Job configuration.
//!
//! Job arguments come from the command line (see [`JobArgs`]); everything
//! else has a default and may be overridden by an optional YAML file.

mod args;
mod vars;

pub use args::JobArgs;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, DuplicatePrefixSnafu, EnvInterpolationSnafu, InvalidDelimiterSnafu,
    InvalidPrefixSnafu, ReadFileSnafu, YamlParseSnafu, ZeroBatchSizeSnafu,
};

/// Main configuration structure for the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Iceberg catalog connection.
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Object key layout inside the bucket.
    #[serde(default)]
    pub layout: LayoutConfig,
    /// CSV reading options.
    #[serde(default)]
    pub source: SourceConfig,
    /// Destination table write options.
    #[serde(default)]
    pub table: TableConfig,
    /// Storage options (credentials, region, endpoint, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Catalog configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog name used when addressing tables (default: "glue_catalog").
    #[serde(default = "default_catalog_name")]
    pub name: String,
    /// Warehouse location. Defaults to `s3://<bucket>/<processed_prefix>`.
    #[serde(default)]
    pub warehouse: Option<String>,
    /// AWS account id owning the Glue catalog, when not the caller's.
    #[serde(default)]
    pub catalog_id: Option<String>,
    /// Alternative Glue endpoint (e.g. for local emulators).
    #[serde(default)]
    pub uri: Option<String>,
    /// Extra properties handed to the catalog client and its FileIO.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            name: default_catalog_name(),
            warehouse: None,
            catalog_id: None,
            uri: None,
            properties: HashMap::new(),
        }
    }
}

fn default_catalog_name() -> String {
    "glue_catalog".to_string()
}

/// Top-level prefixes that partition the bucket by object lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,
    #[serde(default = "default_quarantine_prefix")]
    pub quarantine_prefix: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            raw_prefix: default_raw_prefix(),
            archive_prefix: default_archive_prefix(),
            processed_prefix: default_processed_prefix(),
            quarantine_prefix: default_quarantine_prefix(),
        }
    }
}

fn default_raw_prefix() -> String {
    "raw".to_string()
}

fn default_archive_prefix() -> String {
    "archive".to_string()
}

fn default_processed_prefix() -> String {
    "processed".to_string()
}

fn default_quarantine_prefix() -> String {
    "quarantine".to_string()
}

impl LayoutConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let prefixes = [
            ("raw_prefix", &self.raw_prefix),
            ("archive_prefix", &self.archive_prefix),
            ("processed_prefix", &self.processed_prefix),
            ("quarantine_prefix", &self.quarantine_prefix),
        ];

        for (name, value) in prefixes {
            ensure!(
                !value.is_empty() && !value.contains('/'),
                InvalidPrefixSnafu {
                    name,
                    value: value.clone(),
                }
            );
        }

        for (i, (_, a)) in prefixes.iter().enumerate() {
            for (_, b) in &prefixes[i + 1..] {
                ensure!(a != b, DuplicatePrefixSnafu { value: a.to_string() });
            }
        }

        Ok(())
    }
}

/// CSV source options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Rows decoded per Arrow batch before the batches are combined (default: 8192).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Field delimiter (default: ',').
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Rows sampled for type inference (default: all rows).
    #[serde(default)]
    pub infer_schema_max_records: Option<usize>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delimiter: default_delimiter(),
            infer_schema_max_records: None,
        }
    }
}

fn default_batch_size() -> usize {
    8192
}

fn default_delimiter() -> char {
    ','
}

impl SourceConfig {
    /// Delimiter as the single byte the CSV decoder expects.
    ///
    /// Validation guarantees the delimiter is ASCII.
    pub fn delimiter_byte(&self) -> u8 {
        u8::try_from(self.delimiter).unwrap_or(b',')
    }
}

/// Destination table write options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Parquet compression codec for data files (default: snappy).
    #[serde(default)]
    pub compression: ParquetCompression,
    /// Write distribution mode recorded on the table (default: hash).
    #[serde(default)]
    pub distribution_mode: DistributionMode,
    /// Merge new columns into an existing table schema (default: true).
    #[serde(default = "default_schema_auto_merge")]
    pub schema_auto_merge: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            compression: ParquetCompression::default(),
            distribution_mode: DistributionMode::default(),
            schema_auto_merge: default_schema_auto_merge(),
        }
    }
}

fn default_schema_auto_merge() -> bool {
    true
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is served (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    Uncompressed,
    #[default]
    Snappy,
    Gzip,
    Zstd,
    /// Parquet `LZ4_RAW`; `lz4` is accepted as an alias.
    #[serde(rename = "lz4_raw", alias = "lz4")]
    Lz4Raw,
}

impl ParquetCompression {
    /// Codec name as written to `write.parquet.compression-codec`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParquetCompression::Uncompressed => "uncompressed",
            ParquetCompression::Snappy => "snappy",
            ParquetCompression::Gzip => "gzip",
            ParquetCompression::Zstd => "zstd",
            ParquetCompression::Lz4Raw => "lz4_raw",
        }
    }
}

/// Iceberg write distribution mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistributionMode {
    None,
    #[default]
    Hash,
    Range,
}

impl DistributionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistributionMode::None => "none",
            DistributionMode::Hash => "hash",
            DistributionMode::Range => "range",
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml_str(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml_str(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            let result = vars::interpolate(content);
            if !result.is_ok() {
                let error_msg = result.errors.join("\n");
                return EnvInterpolationSnafu { message: error_msg }.fail();
            }
            result.text
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.layout.validate()?;
        ensure!(self.source.batch_size > 0, ZeroBatchSizeSnafu);
        ensure!(
            self.source.delimiter.is_ascii(),
            InvalidDelimiterSnafu {
                delimiter: self.source.delimiter
            }
        );
        Ok(())
    }

    /// Warehouse location for the given bucket.
    pub fn warehouse(&self, bucket: &str) -> String {
        self.catalog
            .warehouse
            .clone()
            .unwrap_or_else(|| format!("s3://{}/{}", bucket, self.layout.processed_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.catalog.name, "glue_catalog");
        assert_eq!(config.layout.raw_prefix, "raw");
        assert_eq!(config.layout.quarantine_prefix, "quarantine");
        assert_eq!(config.table.compression, ParquetCompression::Snappy);
        assert_eq!(config.table.distribution_mode, DistributionMode::Hash);
        assert!(config.table.schema_auto_merge);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
catalog:
  name: lake_catalog
  properties:
    region: eu-west-1

layout:
  archive_prefix: done

table:
  compression: zstd
  schema_auto_merge: false

source:
  delimiter: ";"
"#;
        let config = Config::from_yaml_str(yaml, false).unwrap();
        assert_eq!(config.catalog.name, "lake_catalog");
        assert_eq!(config.catalog.properties["region"], "eu-west-1");
        assert_eq!(config.layout.archive_prefix, "done");
        assert_eq!(config.layout.raw_prefix, "raw");
        assert_eq!(config.table.compression, ParquetCompression::Zstd);
        assert!(!config.table.schema_auto_merge);
        assert_eq!(config.source.delimiter, ';');
        assert_eq!(config.source.batch_size, 8192);
    }

    #[test]
    fn test_lz4_is_recorded_as_lz4_raw() {
        for value in ["lz4", "lz4_raw"] {
            let yaml = format!("table:\n  compression: {value}\n");
            let config = Config::from_yaml_str(&yaml, false).unwrap();
            assert_eq!(config.table.compression, ParquetCompression::Lz4Raw);
            assert_eq!(config.table.compression.as_str(), "lz4_raw");
        }
    }

    #[test]
    fn test_warehouse_defaults_to_processed_prefix() {
        let config = Config::default();
        assert_eq!(config.warehouse("lake"), "s3://lake/processed");

        let mut config = Config::default();
        config.catalog.warehouse = Some("s3://elsewhere/wh".to_string());
        assert_eq!(config.warehouse("lake"), "s3://elsewhere/wh");
    }

    #[test]
    fn test_rejects_nested_prefix() {
        let yaml = r#"
layout:
  raw_prefix: "landing/raw"
"#;
        let err = Config::from_yaml_str(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPrefix { name: "raw_prefix", .. }));
    }

    #[test]
    fn test_rejects_duplicate_prefixes() {
        let yaml = r#"
layout:
  archive_prefix: raw
"#;
        let err = Config::from_yaml_str(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePrefix { .. }));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let yaml = r#"
source:
  batch_size: 0
"#;
        let err = Config::from_yaml_str(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroBatchSize));
    }

    #[test]
    fn test_rejects_non_ascii_delimiter() {
        let yaml = r#"
source:
  delimiter: "§"
"#;
        let err = Config::from_yaml_str(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDelimiter { delimiter: '§' }));
    }
}
