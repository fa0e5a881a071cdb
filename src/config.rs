//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - rowboat.toml (default configuration)
//! - rowboat.local.toml (git-ignored local overrides)
//! - Environment variables (ROWBOAT_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # rowboat.toml
//! [storage]
//! data_dir = "/var/lib/rowboat/data"
//!
//! [execution]
//! block_size = 4096
//! sort_buffer_blocks = 16
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! ROWBOAT_STORAGE__DATA_DIR=/custom/path
//! ROWBOAT_EXECUTION__BLOCK_SIZE=8192
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Byte quantum for all block-budget accounting.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Default block budget for external merge sort.
pub const DEFAULT_SORT_BUFFER_BLOCKS: usize = 16;

/// Default final-pass block budget for external merge sort.
pub const DEFAULT_SORT_FINAL_BUFFER_BLOCKS: usize = 16;

/// Default block budget for block nested-loop join.
pub const DEFAULT_BNLJ_BUFFER_BLOCKS: usize = 8;

/// Default block budget for hash join.
pub const DEFAULT_HASH_BUFFER_BLOCKS: usize = 16;

/// Hash join stops re-partitioning at this recursion depth, whatever skew
/// remains.
pub const DEFAULT_HASH_MAX_DEPTH: usize = 5;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for heap files (base tables and temp space)
    pub data_dir: PathBuf,

    /// File name of the JSON catalog inside `data_dir`
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
}

/// Execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Block size in bytes; the unit of all memory accounting
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Default memory budget for merge sort, in blocks
    #[serde(default = "default_sort_buffer_blocks")]
    pub sort_buffer_blocks: usize,

    /// Default final-pass memory budget for merge sort, in blocks
    #[serde(default = "default_sort_final_buffer_blocks")]
    pub sort_final_buffer_blocks: usize,

    /// Default memory budget for block nested-loop join, in blocks
    #[serde(default = "default_bnlj_buffer_blocks")]
    pub bnlj_buffer_blocks: usize,

    /// Default memory budget for hash join, in blocks
    #[serde(default = "default_hash_buffer_blocks")]
    pub hash_buffer_blocks: usize,

    /// Maximum hash join re-partitioning depth
    #[serde(default = "default_hash_max_depth")]
    pub hash_max_depth: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_catalog_file() -> String {
    "catalog.json".to_string()
}
fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}
fn default_sort_buffer_blocks() -> usize {
    DEFAULT_SORT_BUFFER_BLOCKS
}
fn default_sort_final_buffer_blocks() -> usize {
    DEFAULT_SORT_FINAL_BUFFER_BLOCKS
}
fn default_bnlj_buffer_blocks() -> usize {
    DEFAULT_BNLJ_BUFFER_BLOCKS
}
fn default_hash_buffer_blocks() -> usize {
    DEFAULT_HASH_BUFFER_BLOCKS
}
fn default_hash_max_depth() -> usize {
    DEFAULT_HASH_MAX_DEPTH
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. rowboat.toml (base configuration)
    /// 2. rowboat.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (ROWBOAT_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("rowboat.toml"))
            .merge(Toml::file("rowboat.local.toml"))
            .merge(Env::prefixed("ROWBOAT_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("ROWBOAT_").split("__"))
            .extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
                catalog_file: default_catalog_file(),
            },
            execution: ExecutionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            block_size: DEFAULT_BLOCK_SIZE,
            sort_buffer_blocks: DEFAULT_SORT_BUFFER_BLOCKS,
            sort_final_buffer_blocks: DEFAULT_SORT_FINAL_BUFFER_BLOCKS,
            bnlj_buffer_blocks: DEFAULT_BNLJ_BUFFER_BLOCKS,
            hash_buffer_blocks: DEFAULT_HASH_BUFFER_BLOCKS,
            hash_max_depth: DEFAULT_HASH_MAX_DEPTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage.data_dir, PathBuf::from("./data"));
        assert_eq!(config.execution.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.execution.hash_max_depth, DEFAULT_HASH_MAX_DEPTH);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).expect("serializes");

        // Verify it contains expected sections
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[execution]"));
        assert!(toml_str.contains("block_size"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [storage]
            data_dir = "/tmp/rowboat"

            [execution]
            block_size = 1024
        "#;
        let config: Config = toml::from_str(toml_str).expect("parses");
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/rowboat"));
        assert_eq!(config.execution.block_size, 1024);
        // unset fields fall back to defaults
        assert_eq!(config.execution.sort_buffer_blocks, DEFAULT_SORT_BUFFER_BLOCKS);
    }
}
