//! Database configuration module.
//!
//! This module provides configuration loading for the `stackdb` binary from
//! environment variables.
//!
//! # Environment Variables
//!
//! - `STACKDB_DATABASE_DIRECTORY`: Directory holding the node and root files (default: `./data`)
//! - `STACKDB_NODE_SIZE_LIMIT`: Largest node, in bytes, for newly created databases (default: `8192`)
//!
//! # Invariants
//!
//! - `database_directory` is never empty (it may not exist yet)
//! - `node_size_limit` is within `[MIN_NODE_SIZE_LIMIT, MAX_NODE_SIZE_LIMIT]`

use std::path::PathBuf;

use crate::storage::DEFAULT_NODE_SIZE_LIMIT;

/// Database configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Directory where the database files are stored.
    pub database_directory: PathBuf,
    /// Node size limit used when a database is created. An existing
    /// database keeps the limit it was created with.
    pub node_size_limit: usize,
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

impl DatabaseConfig {
    /// Default database directory.
    pub const DEFAULT_DATABASE_DIRECTORY: &'static str = "./data";
    /// Default node size limit.
    pub const DEFAULT_NODE_SIZE_LIMIT: usize = DEFAULT_NODE_SIZE_LIMIT;
    /// Smallest allowed node size limit. A full branch must fit in a node.
    pub const MIN_NODE_SIZE_LIMIT: usize = 1024;
    /// Largest allowed node size limit.
    pub const MAX_NODE_SIZE_LIMIT: usize = 65536;

    const DATABASE_DIRECTORY_VAR: &'static str = "STACKDB_DATABASE_DIRECTORY";
    const NODE_SIZE_LIMIT_VAR: &'static str = "STACKDB_NODE_SIZE_LIMIT";

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `STACKDB_DATABASE_DIRECTORY` is set but empty
    /// - `STACKDB_NODE_SIZE_LIMIT` is set but not a number in range
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_directory =
            Self::parse_database_directory(std::env::var(Self::DATABASE_DIRECTORY_VAR).ok().as_deref())?;
        let node_size_limit =
            Self::parse_node_size_limit(std::env::var(Self::NODE_SIZE_LIMIT_VAR).ok().as_deref())?;

        Ok(Self {
            database_directory,
            node_size_limit,
        })
    }

    fn parse_database_directory(value: Option<&str>) -> Result<PathBuf, ConfigError> {
        match value {
            None => Ok(PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY)),
            Some("") => Err(ConfigError::InvalidValue {
                name: Self::DATABASE_DIRECTORY_VAR.to_string(),
                message: "must not be empty".to_string(),
            }),
            Some(dir) => Ok(PathBuf::from(dir)),
        }
    }

    fn parse_node_size_limit(value: Option<&str>) -> Result<usize, ConfigError> {
        let Some(value) = value else {
            return Ok(Self::DEFAULT_NODE_SIZE_LIMIT);
        };
        let invalid = || ConfigError::InvalidValue {
            name: Self::NODE_SIZE_LIMIT_VAR.to_string(),
            message: format!(
                "'{value}' is not a size between {} and {}",
                Self::MIN_NODE_SIZE_LIMIT,
                Self::MAX_NODE_SIZE_LIMIT
            ),
        };
        let limit = value.trim().parse::<usize>().map_err(|_| invalid())?;
        if !(Self::MIN_NODE_SIZE_LIMIT..=Self::MAX_NODE_SIZE_LIMIT).contains(&limit) {
            return Err(invalid());
        }
        Ok(limit)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_directory: PathBuf::from(Self::DEFAULT_DATABASE_DIRECTORY),
            node_size_limit: Self::DEFAULT_NODE_SIZE_LIMIT,
        }
    }
}
