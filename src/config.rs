//! Run configuration.
//!
//! Loads and validates `pack-organizer.toml`. Stock defaults form the base
//! layer; a user file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [processing]
//! max_workers = 8            # Per-pack worker ceiling (capped at CPU cores)
//!
//! [watermark]
//! path = "watermark.png"     # Watermark source image
//! anchor = "top_right"       # One of nine anchors, unknown names fall back to top_right
//! opacity = 0.95             # 0.0 - 1.0
//! scale = 0.35               # Fraction of the base image's shorter side
//! margin_x = 20              # Horizontal inset in pixels
//! margin_y = 20              # Vertical inset in pixels
//!
//! [transform]
//! interpreter = "python3"    # Empty string runs the script directly
//! script = "external/pixivMosaic2.py"
//! descriptor = "external/PixivMosaicWorkflowAPI.json"
//! timeout_secs = 180         # Per attempt
//! retries = 2                # Attempts before falling back to a copy
//!
//! [metadata]
//! max_embed_bytes = 60000    # Ceiling for compact JSON written into an image (1..=65000)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::Anchor;
use crate::metadata::MAX_EMBED_BYTES_LIMIT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "pack-organizer.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Full run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrganizerConfig {
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Watermark applied to free-post copies.
    pub watermark: WatermarkConfig,
    /// External transform service invocation.
    pub transform: TransformConfig,
    /// Metadata embedding limits.
    pub metadata: MetadataConfig,
}

impl OrganizerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing.max_workers == 0 {
            return Err(ConfigError::Validation(
                "processing.max_workers must be at least 1".into(),
            ));
        }
        self.watermark.validate()?;
        if self.transform.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "transform.timeout_secs must be at least 1".into(),
            ));
        }
        if self.transform.retries == 0 {
            return Err(ConfigError::Validation(
                "transform.retries must be at least 1".into(),
            ));
        }
        if self.metadata.max_embed_bytes == 0 {
            return Err(ConfigError::Validation(
                "metadata.max_embed_bytes must be non-zero".into(),
            ));
        }
        if self.metadata.max_embed_bytes > MAX_EMBED_BYTES_LIMIT {
            return Err(ConfigError::Validation(format!(
                "metadata.max_embed_bytes must be at most {MAX_EMBED_BYTES_LIMIT}"
            )));
        }
        Ok(())
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers per pack.
    /// Values larger than the core count are clamped down.
    pub max_workers: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { max_workers: 8 }
    }
}

/// Resolve the effective thread count from config: `min(max_workers, cores)`,
/// never below one.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_workers.min(cores).max(1)
}

/// Watermark settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatermarkConfig {
    /// Watermark source image.
    pub path: PathBuf,
    /// Placement anchor.
    pub anchor: Anchor,
    /// Alpha multiplier, 0.0 (invisible) to 1.0 (unchanged).
    pub opacity: f64,
    /// Target size as a fraction of the base image's shorter side.
    pub scale: f64,
    /// Horizontal inset from the anchored edge, in pixels.
    pub margin_x: u32,
    /// Vertical inset from the anchored edge, in pixels.
    pub margin_y: u32,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("watermark.png"),
            anchor: Anchor::TopRight,
            opacity: 0.95,
            scale: 0.35,
            margin_x: 20,
            margin_y: 20,
        }
    }
}

impl WatermarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ConfigError::Validation(
                "watermark.opacity must be between 0.0 and 1.0".into(),
            ));
        }
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(ConfigError::Validation(
                "watermark.scale must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// External transform settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    /// Program used to run the script. Empty runs the script itself.
    pub interpreter: String,
    /// Transform script.
    pub script: PathBuf,
    /// Workflow descriptor (JSON) passed as the first script argument.
    pub descriptor: PathBuf,
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Attempts before falling back to copying the input.
    pub retries: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script: PathBuf::from("external/pixivMosaic2.py"),
            descriptor: PathBuf::from("external/PixivMosaicWorkflowAPI.json"),
            timeout_secs: 180,
            retries: 2,
        }
    }
}

impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Metadata embedding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetadataConfig {
    /// Largest compact JSON payload, in bytes, that will be embedded.
    pub max_embed_bytes: usize,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            max_embed_bytes: crate::metadata::DEFAULT_MAX_EMBED_BYTES,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(OrganizerConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value. `Ok(None)` when the file is absent.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<OrganizerConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: OrganizerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the config file at `path` over stock defaults.
///
/// A missing file yields the (validated) defaults.
pub fn load_config(path: &Path) -> Result<OrganizerConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock config file.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# pack-organizer configuration
# ============================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers per pack. Clamped to the number of CPU cores.
max_workers = 8

# ---------------------------------------------------------------------------
# Watermark (applied to free_post/ copies)
# ---------------------------------------------------------------------------
[watermark]
# Watermark source image. Must exist and decode before any pack is touched.
path = "watermark.png"

# top_left, top_center, top_right,
# center_left, center, center_right,
# bottom_left, bottom_center, bottom_right
anchor = "top_right"

# Alpha multiplier: 0.0 = invisible, 1.0 = unchanged.
opacity = 0.95

# Watermark size as a fraction of the base image's shorter side.
scale = 0.35

# Inset from the anchored edges, in pixels.
margin_x = 20
margin_y = 20

# ---------------------------------------------------------------------------
# External transform (original_images/ -> pixiv_safe/)
# ---------------------------------------------------------------------------
[transform]
# Program used to run the script. Empty string executes the script directly.
interpreter = "python3"

# Invoked as: <interpreter> <script> <descriptor> <input> <output>
script = "external/pixivMosaic2.py"
descriptor = "external/PixivMosaicWorkflowAPI.json"

# Seconds before an attempt is killed.
timeout_secs = 180

# Attempts per image before the input is copied through unchanged.
retries = 2

# ---------------------------------------------------------------------------
# Metadata
# ---------------------------------------------------------------------------
[metadata]
# Largest compact JSON payload, in bytes, embedded into an image.
# Larger payloads are rejected, never truncated.
max_embed_bytes = 60000
"##
}
