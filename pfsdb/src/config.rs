//! Configuration module.
//!
//! This module provides configuration loading for pfsdb from environment
//! variables.
//!
//! # Environment Variables
//!
//! - `PFS_DATABASE_DIRECTORY`: Directory where paged files are stored (default: `./data`)
//! - `PFS_BLOCKS_PER_FILE`: Blocks in each new paged file (default: `4000`)
//! - `PFS_BTREE_ORDER`: Order of the per-file B-tree indexes (default: `11`)
//!
//! # Invariants
//!
//! - `blocks_per_file` is within `MIN_BLOCKS_PER_FILE..=MAX_BLOCKS_PER_FILE`
//! - `btree_order` is within `MIN_ORDER..=MAX_ORDER`

use std::ops::RangeInclusive;
use std::path::PathBuf;

use crate::storage::DatabaseOptions;
use crate::storage::allocator::MAX_TRACKED_BLOCKS;
use crate::storage::btree::{MAX_ORDER, MIN_ORDER};
use crate::storage::file::FILE_ZERO_RESERVED;

/// Smallest paged file that still has a free block after its reserved ones.
pub const MIN_BLOCKS_PER_FILE: usize = FILE_ZERO_RESERVED + 1;

/// Largest paged file the allocation bitmap can track.
pub const MAX_BLOCKS_PER_FILE: usize = MAX_TRACKED_BLOCKS;

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfsConfig {
    /// Directory where database files are stored.
    /// Each database's files are at `{database_directory}/{name}.db{N}`.
    pub database_directory: PathBuf,
    /// Blocks in each newly created paged file.
    pub blocks_per_file: usize,
    /// Order of the B-tree built for each stored file.
    pub btree_order: usize,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for PfsConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY),
            blocks_per_file: Self::DEFAULT_BLOCKS_PER_FILE,
            btree_order: Self::DEFAULT_BTREE_ORDER,
        }
    }
}

impl PfsConfig {
    /// Default database directory.
    pub const DEFAULT_DATABASE_DIRECTORY: &'static str = "./data";
    /// Default blocks per paged file.
    pub const DEFAULT_BLOCKS_PER_FILE: usize = DatabaseOptions::DEFAULT_BLOCKS_PER_FILE;
    /// Default B-tree order.
    pub const DEFAULT_BTREE_ORDER: usize = DatabaseOptions::DEFAULT_BTREE_ORDER;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `PFS_BLOCKS_PER_FILE` or `PFS_BTREE_ORDER` is set
    /// but not a number in its allowed range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_directory = Self::load_database_directory();
        let blocks_per_file = load_bounded(
            "PFS_BLOCKS_PER_FILE",
            Self::DEFAULT_BLOCKS_PER_FILE,
            MIN_BLOCKS_PER_FILE..=MAX_BLOCKS_PER_FILE,
        )?;
        let btree_order = load_bounded(
            "PFS_BTREE_ORDER",
            Self::DEFAULT_BTREE_ORDER,
            MIN_ORDER..=MAX_ORDER,
        )?;

        Ok(Self {
            database_directory,
            blocks_per_file,
            btree_order,
        })
    }

    /// Load the database directory from environment.
    ///
    /// Returns the default if not set.
    fn load_database_directory() -> PathBuf {
        std::env::var("PFS_DATABASE_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY))
    }

    #[must_use]
    pub fn with_database_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.database_directory = directory.into();
        self
    }

    #[must_use]
    pub const fn with_blocks_per_file(mut self, blocks_per_file: usize) -> Self {
        self.blocks_per_file = blocks_per_file;
        self
    }

    #[must_use]
    pub const fn with_btree_order(mut self, btree_order: usize) -> Self {
        self.btree_order = btree_order;
        self
    }

    /// Sizing parameters for databases opened under this configuration.
    #[must_use]
    pub const fn database_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            blocks_per_file: self.blocks_per_file,
            btree_order: self.btree_order,
        }
    }
}

/// Load a numeric variable, falling back to `default` when it is not set.
fn load_bounded(
    name: &str,
    default: usize,
    range: RangeInclusive<usize>,
) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_bounded(name, &value, range),
        Err(_) => Ok(default),
    }
}

/// Parse a number that must fall within `range`.
fn parse_bounded(
    name: &str,
    value: &str,
    range: RangeInclusive<usize>,
) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name: name.to_string(),
        message: format!(
            "'{value}' is not a number in {}..={}",
            range.start(),
            range.end()
        ),
    };
    let parsed = value.trim().parse::<usize>().map_err(|_| invalid())?;
    if !range.contains(&parsed) {
        return Err(invalid());
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = PfsConfig::default();
        assert_eq!(config.database_directory, PathBuf::from("./data"));
        assert_eq!(config.blocks_per_file, 4000);
        assert_eq!(config.btree_order, 11);
    }

    #[test]
    fn test_builders() {
        let config = PfsConfig::default()
            .with_database_directory("/tmp/pfs")
            .with_blocks_per_file(64)
            .with_btree_order(5);
        assert_eq!(config.database_directory, PathBuf::from("/tmp/pfs"));
        assert_eq!(
            config.database_options(),
            DatabaseOptions {
                blocks_per_file: 64,
                btree_order: 5
            }
        );
    }

    #[test]
    fn test_parse_bounded() {
        assert_eq!(parse_bounded("PFS_BTREE_ORDER", "5", 2..=12), Ok(5));
        assert_eq!(parse_bounded("PFS_BTREE_ORDER", " 12 ", 2..=12), Ok(12));
        assert_eq!(
            parse_bounded("PFS_BTREE_ORDER", "13", 2..=12),
            Err(ConfigError::InvalidValue {
                name: "PFS_BTREE_ORDER".to_string(),
                message: "'13' is not a number in 2..=12".to_string(),
            })
        );
        assert!(parse_bounded("PFS_BLOCKS_PER_FILE", "lots", 7..=4096).is_err());
        assert!(parse_bounded("PFS_BLOCKS_PER_FILE", "-1", 7..=4096).is_err());
    }

    #[test]
    fn test_block_bounds_match_storage() {
        assert_eq!(MIN_BLOCKS_PER_FILE, 7);
        assert_eq!(MAX_BLOCKS_PER_FILE, 4096);
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
