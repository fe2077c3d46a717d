// In: src/config.rs

//! The single source of truth for all bloark run configuration.
//!
//! Configuration is created once at the application boundary (a JSON file, a CLI
//! wrapper, or plain Rust) and handed to the `Builder` or `Modifier`. Everything the
//! warehouse store itself needs is narrowed down into `WarehouseOptions` so the
//! storage layer never sees pipeline-level settings.

use std::path::PathBuf;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::error::BloarkError;

//==================================================================================
// I. Core Configuration Enums & Structs
//==================================================================================

/// How individual block frames are stored inside a warehouse.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseCompression {
    /// **Default:** every block is an independent zstd frame, so a single block can
    /// be decoded from its index entry without touching its neighbours.
    #[default]
    Zstd,

    /// Blocks are stored as raw serialized records. Mostly useful for debugging.
    None,
}

/// Defines the trade-off between compression speed and final warehouse size.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionProfile {
    /// Prioritizes speed over size.
    Fast,

    /// A balance between speed and size. This is the recommended default.
    #[default]
    Balanced,

    /// Prioritizes the smallest possible warehouse at the cost of CPU time.
    HighCompression,
}

impl CompressionProfile {
    /// The zstd level used for block frames under this profile.
    pub fn zstd_level(self) -> i32 {
        match self {
            CompressionProfile::Fast => 1,
            CompressionProfile::Balanced => 3,
            CompressionProfile::HighCompression => 19,
        }
    }
}

/// Logging verbosity, kept as our own enum so it round-trips through serde.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(v: Verbosity) -> Self {
        match v {
            Verbosity::Quiet => LevelFilter::Off,
            Verbosity::Error => LevelFilter::Error,
            Verbosity::Warn => LevelFilter::Warn,
            Verbosity::Info => LevelFilter::Info,
            Verbosity::Debug => LevelFilter::Debug,
            Verbosity::Trace => LevelFilter::Trace,
        }
    }
}

/// Size policy for a single warehouse. A writer rolls over once *either* limit is met,
/// but only at a group boundary.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Threshold {
    /// Maximum number of blocks before rolling over.
    #[serde(default)]
    pub max_blocks: Option<u64>,

    /// Maximum number of *uncompressed* record bytes before rolling over.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: Option<u64>,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            max_blocks: None,
            max_bytes: default_max_bytes(),
        }
    }
}

impl Threshold {
    pub fn blocks(max_blocks: u64) -> Self {
        Self {
            max_blocks: Some(max_blocks),
            max_bytes: None,
        }
    }

    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_blocks: None,
            max_bytes: Some(max_bytes),
        }
    }

    /// True once the given counters have met or exceeded any configured limit.
    pub fn is_met(&self, blocks: u64, raw_bytes: u64) -> bool {
        self.max_blocks.is_some_and(|max| blocks >= max)
            || self.max_bytes.is_some_and(|max| raw_bytes >= max)
    }

    fn validate(&self) -> Result<(), BloarkError> {
        match (self.max_blocks, self.max_bytes) {
            (None, None) => Err(BloarkError::InvalidConfig(
                "threshold must set max_blocks or max_bytes".into(),
            )),
            (Some(0), _) | (_, Some(0)) => Err(BloarkError::InvalidConfig(
                "threshold limits must be greater than zero".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// The subset of configuration the warehouse store needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarehouseOptions {
    pub compression: WarehouseCompression,
    pub zstd_level: i32,
    /// Allow `create()` to replace a non-empty file at the target path.
    pub overwrite: bool,
}

impl Default for WarehouseOptions {
    fn default() -> Self {
        Self {
            compression: WarehouseCompression::default(),
            zstd_level: CompressionProfile::default().zstd_level(),
            overwrite: false,
        }
    }
}

//==================================================================================
// II. Entry-Point Configurations
//==================================================================================

/// Configuration for a `Builder` run (raw dumps -> warehouses).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct BuilderConfig {
    pub output_dir: PathBuf,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub threshold: Threshold,

    #[serde(default)]
    pub compression: WarehouseCompression,

    #[serde(default)]
    pub profile: CompressionProfile,

    #[serde(default)]
    pub verbosity: Verbosity,

    /// Replace existing warehouse files in `output_dir` instead of failing.
    #[serde(default)]
    pub overwrite: bool,

    /// Run the cross-warehouse group uniqueness check after all units finish.
    #[serde(default = "default_true")]
    pub verify_group_uniqueness: bool,
}

impl BuilderConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            workers: default_workers(),
            threshold: Threshold::default(),
            compression: WarehouseCompression::default(),
            profile: CompressionProfile::default(),
            verbosity: Verbosity::default(),
            overwrite: false,
            verify_group_uniqueness: true,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, BloarkError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BloarkError> {
        validate_common(&self.output_dir, self.workers)?;
        self.threshold.validate()
    }

    pub fn warehouse_options(&self) -> WarehouseOptions {
        WarehouseOptions {
            compression: self.compression,
            zstd_level: self.profile.zstd_level(),
            overwrite: self.overwrite,
        }
    }
}

/// Configuration for a `Modifier` run (warehouses -> rewritten warehouses).
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
pub struct ModifierConfig {
    pub output_dir: PathBuf,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub threshold: Threshold,

    #[serde(default)]
    pub compression: WarehouseCompression,

    #[serde(default)]
    pub profile: CompressionProfile,

    #[serde(default)]
    pub verbosity: Verbosity,

    #[serde(default)]
    pub overwrite: bool,
}

impl ModifierConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            workers: default_workers(),
            threshold: Threshold::default(),
            compression: WarehouseCompression::default(),
            profile: CompressionProfile::default(),
            verbosity: Verbosity::default(),
            overwrite: false,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, BloarkError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BloarkError> {
        validate_common(&self.output_dir, self.workers)?;
        self.threshold.validate()
    }

    pub fn warehouse_options(&self) -> WarehouseOptions {
        WarehouseOptions {
            compression: self.compression,
            zstd_level: self.profile.zstd_level(),
            overwrite: self.overwrite,
        }
    }
}

fn validate_common(output_dir: &std::path::Path, workers: usize) -> Result<(), BloarkError> {
    if output_dir.as_os_str().is_empty() {
        return Err(BloarkError::InvalidConfig("output_dir cannot be empty".into()));
    }
    if workers == 0 {
        return Err(BloarkError::InvalidConfig("workers must be at least 1".into()));
    }
    Ok(())
}

/// Helper for `serde` to default a boolean field to true.
fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

/// 64 MiB of uncompressed records per warehouse.
fn default_max_bytes() -> Option<u64> {
    Some(64 * 1024 * 1024)
}
