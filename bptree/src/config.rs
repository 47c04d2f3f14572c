//! Store configuration module.
//!
//! Cache sizes and the page size are passed explicitly to every tree and
//! index constructor. `StoreConfig::default()` gives the stock tuning;
//! `StoreConfig::from_env()` lets a host process override it.
//!
//! # Environment Variables
//!
//! - `BPTREE_PAGE_SIZE`: page size for newly created files (default: `4096`)
//! - `BPTREE_NODE_CACHE_SIZE`: b-tree nodes kept in memory (default: `4096`)
//! - `BPTREE_NODE_CACHE_PURGE_UNIT`: nodes evicted per overflow (default: `8`)
//! - `BPTREE_DATA_CACHE_SIZE`: data pages kept in memory (default: `2048`)
//! - `BPTREE_DATA_CACHE_PURGE_UNIT`: data pages evicted per overflow (default: `16`)
//! - `BPTREE_PAGE_CACHE_SIZE`: raw pages kept by the page store (default: `256`)
//!
//! # Invariants
//!
//! - `page_size` is a power of two in `512..=1048576`
//! - every purge unit is at least 1 and at most its cache size

use crate::storage::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Tuning for a tree or value index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Page size used when creating a file. Existing files keep their own.
    pub page_size: usize,
    /// Capacity of the b-tree node cache.
    pub node_cache_size: usize,
    /// Nodes evicted together when the node cache overflows.
    pub node_cache_purge_unit: usize,
    /// Capacity of the data page cache (value store only).
    pub data_cache_size: usize,
    /// Data pages evicted together when the data cache overflows.
    pub data_cache_purge_unit: usize,
    /// Capacity of the page store's clean page cache.
    pub page_cache_size: usize,
}

/// Error returned when configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting has an invalid value.
    InvalidValue { name: String, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name: name.to_string(),
            message: message.into(),
        }
    }
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

impl StoreConfig {
    /// Default page size.
    pub const DEFAULT_PAGE_SIZE: usize = 4096;
    /// Default node cache capacity.
    pub const DEFAULT_NODE_CACHE_SIZE: usize = 4096;
    /// Default node cache purge unit.
    pub const DEFAULT_NODE_CACHE_PURGE_UNIT: usize = 8;
    /// Default data cache capacity.
    pub const DEFAULT_DATA_CACHE_SIZE: usize = 2048;
    /// Default data cache purge unit.
    pub const DEFAULT_DATA_CACHE_PURGE_UNIT: usize = 16;
    /// Default page cache capacity.
    pub const DEFAULT_PAGE_CACHE_SIZE: usize = 256;

    /// Load configuration from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but is not a number, or if the
    /// resulting configuration fails `validate()`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let load = |name: &str, default: usize| -> Result<usize, ConfigError> {
            lookup(name).map_or(Ok(default), |value| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::invalid(name, format!("'{value}' is not a number")))
            })
        };

        let config = Self {
            page_size: load("BPTREE_PAGE_SIZE", defaults.page_size)?,
            node_cache_size: load("BPTREE_NODE_CACHE_SIZE", defaults.node_cache_size)?,
            node_cache_purge_unit: load(
                "BPTREE_NODE_CACHE_PURGE_UNIT",
                defaults.node_cache_purge_unit,
            )?,
            data_cache_size: load("BPTREE_DATA_CACHE_SIZE", defaults.data_cache_size)?,
            data_cache_purge_unit: load(
                "BPTREE_DATA_CACHE_PURGE_UNIT",
                defaults.data_cache_purge_unit,
            )?,
            page_cache_size: load("BPTREE_PAGE_CACHE_SIZE", defaults.page_cache_size)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every setting against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two()
            || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.page_size)
        {
            return Err(ConfigError::invalid(
                "page_size",
                format!(
                    "{} must be a power of two in {MIN_PAGE_SIZE}..={MAX_PAGE_SIZE}",
                    self.page_size
                ),
            ));
        }
        check_cache(
            "node_cache",
            self.node_cache_size,
            self.node_cache_purge_unit,
        )?;
        check_cache(
            "data_cache",
            self.data_cache_size,
            self.data_cache_purge_unit,
        )?;
        if self.page_cache_size == 0 {
            return Err(ConfigError::invalid("page_cache_size", "must be positive"));
        }
        Ok(())
    }
}

/// Validate a cache capacity / purge unit pair.
pub(crate) fn check_cache(name: &str, capacity: usize, purge_unit: usize) -> Result<(), ConfigError> {
    if capacity == 0 {
        return Err(ConfigError::invalid(name, "capacity must be positive"));
    }
    if purge_unit == 0 || purge_unit > capacity {
        return Err(ConfigError::invalid(
            name,
            format!("purge unit {purge_unit} must be in 1..={capacity}"),
        ));
    }
    Ok(())
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            node_cache_size: Self::DEFAULT_NODE_CACHE_SIZE,
            node_cache_purge_unit: Self::DEFAULT_NODE_CACHE_PURGE_UNIT,
            data_cache_size: Self::DEFAULT_DATA_CACHE_SIZE,
            data_cache_purge_unit: Self::DEFAULT_DATA_CACHE_PURGE_UNIT,
            page_cache_size: Self::DEFAULT_PAGE_CACHE_SIZE,
        }
    }
}
