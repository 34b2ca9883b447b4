// src/core/config.rs

use crate::core::common::OxivecError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration shared by the online index and the batch builders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Records a leaf holds before it tries to split.
    pub list_threshold: usize,
    /// Store operations the iterative builder keeps in flight per wave.
    ///
    /// They are polled concurrently on the task that awaits the build, not
    /// spread over runtime threads, so overlap only happens while store
    /// operations are suspended.
    pub parallelism: usize,
    /// Points a file range store buffers in memory before spilling.
    pub range_buffer: usize,
    /// Directory for spill files; the system temp dir when `None`.
    pub temp_dir: Option<PathBuf>,
    /// Fail a build with `NodeIdOverflow` once node ids no longer fit in 64
    /// bits. When unset, nodes past that depth are still split and counted
    /// but their ranges are not published.
    pub strict_node_ids: bool,
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    list_threshold: Option<usize>,
    parallelism: Option<usize>,
    range_buffer: Option<usize>,
    temp_dir: Option<PathBuf>,
    strict_node_ids: Option<bool>,
}

impl ConfigBuilder {
    /// Creates a new ConfigBuilder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the leaf list threshold
    pub fn list_threshold(mut self, threshold: usize) -> Self {
        self.list_threshold = Some(threshold);
        self
    }

    /// Sets the builder's concurrency
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Sets the in-memory buffer of file range stores
    pub fn range_buffer(mut self, points: usize) -> Self {
        self.range_buffer = Some(points);
        self
    }

    /// Sets the directory for spill files
    pub fn temp_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.temp_dir = Some(path.into());
        self
    }

    /// Makes node id overflow a build error
    pub fn strict_node_ids(mut self, strict: bool) -> Self {
        self.strict_node_ids = Some(strict);
        self
    }

    /// Builds the Config instance with validation
    pub fn build(self) -> Result<Config, OxivecError> {
        let defaults = Config::default();
        let config = Config {
            list_threshold: self.list_threshold.unwrap_or(defaults.list_threshold),
            parallelism: self.parallelism.unwrap_or(defaults.parallelism),
            range_buffer: self.range_buffer.unwrap_or(defaults.range_buffer),
            temp_dir: self.temp_dir.or(defaults.temp_dir),
            strict_node_ids: self.strict_node_ids.unwrap_or(defaults.strict_node_ids),
        };

        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self { list_threshold: 10, parallelism: 8, range_buffer: 10_000, temp_dir: None, strict_node_ids: false }
    }
}

impl Config {
    /// Creates a new ConfigBuilder for fluent configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), OxivecError> {
        if self.list_threshold == 0 {
            return Err(OxivecError::InvalidConfiguration(
                "list_threshold must be greater than 0".to_string(),
            ));
        }

        if self.parallelism == 0 {
            return Err(OxivecError::InvalidConfiguration(
                "parallelism must be greater than 0".to_string(),
            ));
        }

        if self.range_buffer == 0 {
            return Err(OxivecError::InvalidConfiguration(
                "range_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `OxivecError::InvalidConfiguration` if the file cannot be parsed
    /// or holds invalid values, and `OxivecError::Io` if it cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, OxivecError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config: Self = toml::from_str(&contents).map_err(|e| {
                    OxivecError::InvalidConfiguration(format!(
                        "Failed to parse config file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;

                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(OxivecError::Io(e)),
        }
    }

    /// Loads configuration from an optional TOML file path.
    pub fn load_or_default(optional_path: Option<&Path>) -> Result<Self, OxivecError> {
        match optional_path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Configuration for tests: tiny leaves and spill buffers so small
    /// datasets exercise splitting and spilling.
    pub fn for_testing() -> Result<Self, OxivecError> {
        Self::builder().list_threshold(2).parallelism(4).range_buffer(16).build()
    }
}
