//! Watermark compositing.
//!
//! A [`Watermark`] is decoded once per run and then shared read-only by every
//! worker; [`Watermark::apply`] never mutates it. Compositing works on a copy
//! of the base image:
//!
//! 1. scale the watermark against the base's shorter side
//!    ([`calculate_watermark_size`](super::calculate_watermark_size)), Lanczos3
//! 2. multiply its alpha by `opacity` when below 1.0
//! 3. place it on a transparent canvas the size of the base at the anchor offset
//! 4. alpha-blend the canvas over the base and drop the alpha channel

use super::calculations::{calculate_anchor_offset, calculate_watermark_size, scale_alpha};
use crate::config::WatermarkConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Watermark source not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode watermark {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Invalid watermark settings: {0}")]
    Invalid(String),
}

/// Placement of the watermark on the base image.
///
/// Parsed from names like `bottom_left`; any unrecognized name resolves to
/// [`Anchor::TopRight`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    #[default]
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Anchor::TopLeft => "top_left",
            Anchor::TopCenter => "top_center",
            Anchor::TopRight => "top_right",
            Anchor::CenterLeft => "center_left",
            Anchor::Center => "center",
            Anchor::CenterRight => "center_right",
            Anchor::BottomLeft => "bottom_left",
            Anchor::BottomCenter => "bottom_center",
            Anchor::BottomRight => "bottom_right",
        }
    }

    /// Resolve an anchor name, falling back to `top_right`.
    pub fn from_name(name: &str) -> Anchor {
        Anchor::ALL
            .into_iter()
            .find(|a| a.as_str() == name)
            .unwrap_or(Anchor::TopRight)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for Anchor {
    fn from(name: String) -> Self {
        Anchor::from_name(&name)
    }
}

impl From<Anchor> for String {
    fn from(anchor: Anchor) -> Self {
        anchor.as_str().to_string()
    }
}

/// A decoded, immutable watermark plus its placement settings.
#[derive(Debug, Clone)]
pub struct Watermark {
    image: RgbaImage,
    anchor: Anchor,
    opacity: f64,
    scale: f64,
    margins: (u32, u32),
}

impl Watermark {
    /// Decode the configured watermark source.
    ///
    /// Fails when the file is missing or undecodable, or when the settings
    /// are out of range.
    pub fn load(config: &WatermarkConfig) -> Result<Self, WatermarkError> {
        if !config.path.is_file() {
            return Err(WatermarkError::NotFound(config.path.clone()));
        }
        let decoded = ImageReader::open(&config.path)?
            .with_guessed_format()?
            .decode()
            .map_err(|source| WatermarkError::Decode {
                path: config.path.clone(),
                source,
            })?;
        Self::from_image(decoded, config)
    }

    /// Build from an already-decoded image.
    pub fn from_image(image: DynamicImage, config: &WatermarkConfig) -> Result<Self, WatermarkError> {
        config
            .validate()
            .map_err(|e| WatermarkError::Invalid(e.to_string()))?;
        if image.width() == 0 || image.height() == 0 {
            return Err(WatermarkError::Invalid("watermark image is empty".into()));
        }
        Ok(Self {
            image: image.to_rgba8(),
            anchor: config.anchor,
            opacity: config.opacity,
            scale: config.scale,
            margins: (config.margin_x, config.margin_y),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    /// Composite onto a copy of `base` and return the flattened RGB result.
    pub fn apply(&self, base: &DynamicImage) -> RgbImage {
        let mut composed = base.to_rgba8();
        let base_dims = composed.dimensions();

        let (w, h) = calculate_watermark_size(base_dims, self.image.dimensions(), self.scale);
        let mut mark = imageops::resize(&self.image, w, h, FilterType::Lanczos3);
        if self.opacity < 1.0 {
            for pixel in mark.pixels_mut() {
                pixel[3] = scale_alpha(pixel[3], self.opacity);
            }
        }

        let (x, y) = calculate_anchor_offset(self.anchor, base_dims, (w, h), self.margins);
        let mut layer = RgbaImage::new(base_dims.0, base_dims.1);
        imageops::overlay(&mut layer, &mark, x, y);
        imageops::overlay(&mut composed, &layer, 0, 0);

        DynamicImage::ImageRgba8(composed).to_rgb8()
    }
}

/// One-shot form: load the watermark described by `config` and apply it.
pub fn apply_watermark(
    base: &DynamicImage,
    config: &WatermarkConfig,
) -> Result<RgbImage, WatermarkError> {
    Ok(Watermark::load(config)?.apply(base))
}
