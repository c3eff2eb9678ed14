//! Decoding and encoding of pack images.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (PNG, JPEG, WebP) | `image::ImageReader` with content sniffing |
//! | Flatten alpha onto white | in-place blend, see [`flatten_on_white`] |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` with quality |
//! | Encode → lossy WebP | `webp::Encoder` (libwebp) with quality |
//! | Encode → PNG | `image::codecs::png::PngEncoder` (lossless, keeps alpha) |
//!
//! Metadata is not written here. Encoders produce bare files and the
//! [`metadata`](crate::metadata) codec splices the JSON blob in afterwards.

use super::params::Quality;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Failed to encode {path}: {message}")]
    Encode { path: PathBuf, message: String },
}

/// Load and decode an image from disk. The format is sniffed from content,
/// not trusted from the extension.
pub fn load_image(path: &Path) -> Result<DynamicImage, ImagingError> {
    let decode_err = |source| ImagingError::Decode {
        path: path.to_path_buf(),
        source,
    };
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(decode_err)
}

/// Convert to RGB, compositing any alpha channel over opaque white.
///
/// Images without alpha are converted directly.
pub fn flatten_on_white(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (src, dst) in rgba.pixels().zip(out.pixels_mut()) {
        let a = src[3] as u32;
        for c in 0..3 {
            let blended = (src[c] as u32 * a + 255 * (255 - a) + 127) / 255;
            dst[c] = blended as u8;
        }
    }
    out
}

/// Encode as baseline JPEG.
pub fn save_jpeg(img: &RgbImage, path: &Path, quality: Quality) -> Result<(), ImagingError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let encoder = JpegEncoder::new_with_quality(&mut writer, quality.value() as u8);
    img.write_with_encoder(encoder)
        .map_err(|e| ImagingError::Encode {
            path: path.to_path_buf(),
            message: format!("JPEG encode failed: {e}"),
        })?;
    writer.flush()?;
    Ok(())
}

/// Encode as lossy WebP.
///
/// libwebp rejects frames wider or taller than 16383 px; that surfaces as
/// [`ImagingError::Encode`] for this image only.
pub fn save_webp(img: &RgbImage, path: &Path, quality: Quality) -> Result<(), ImagingError> {
    let (w, h) = img.dimensions();
    let encoded = webp::Encoder::from_rgb(img.as_raw(), w, h)
        .encode_simple(false, quality.value() as f32)
        .map_err(|e| ImagingError::Encode {
            path: path.to_path_buf(),
            message: format!("WebP encode failed: {e:?}"),
        })?;
    std::fs::write(path, &*encoded)?;
    Ok(())
}

/// Encode as lossless PNG, preserving the source's channels (alpha included).
pub fn save_png(img: &DynamicImage, path: &Path) -> Result<(), ImagingError> {
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| ImagingError::Encode {
            path: path.to_path_buf(),
            message: format!("PNG encode failed: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{solid_rgb, solid_rgba};
    use image::{GenericImageView, Rgb};
    use tempfile::TempDir;

    #[test]
    fn flatten_opaque_is_plain_conversion() {
        let img = DynamicImage::ImageRgb8(solid_rgb(4, 4, [10, 20, 30]));
        let out = flatten_on_white(&img);
        assert!(out.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn flatten_transparent_becomes_white() {
        let img = DynamicImage::ImageRgba8(solid_rgba(4, 4, [0, 0, 0, 0]));
        let out = flatten_on_white(&img);
        assert!(out.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn flatten_half_alpha_blends_with_white() {
        let img = DynamicImage::ImageRgba8(solid_rgba(1, 1, [0, 0, 0, 128]));
        let out = flatten_on_white(&img);
        // 255 * 127 / 255 = 127
        assert_eq!(*out.get_pixel(0, 0), Rgb([127, 127, 127]));
    }

    #[test]
    fn jpeg_roundtrip_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jpeg");
        save_jpeg(&solid_rgb(64, 48, [200, 10, 10]), &path, Quality::new(90)).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (64, 48));
    }

    #[test]
    fn webp_roundtrip_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.webp");
        save_webp(&solid_rgb(32, 20, [0, 128, 0]), &path, Quality::new(85)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WEBP");
        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.dimensions(), (32, 20));
    }

    #[test]
    fn webp_over_dimension_limit_is_encode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("wide.webp");
        let err = save_webp(&solid_rgb(16400, 2, [0, 0, 0]), &path, Quality::PREVIEW).unwrap_err();
        assert!(matches!(err, ImagingError::Encode { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn png_keeps_alpha() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.png");
        let img = DynamicImage::ImageRgba8(solid_rgba(8, 8, [1, 2, 3, 50]));
        save_png(&img, &path).unwrap();

        let loaded = load_image(&path).unwrap();
        assert!(loaded.color().has_alpha());
        assert_eq!(loaded.to_rgba8().get_pixel(0, 0)[3], 50);
    }

    #[test]
    fn load_sniffs_content_not_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("actually_png.jpg");
        let img = DynamicImage::ImageRgb8(solid_rgb(5, 5, [9, 9, 9]));
        img.save_with_format(&path, ImageFormat::Png).unwrap();

        assert_eq!(load_image(&path).unwrap().dimensions(), (5, 5));
    }

    #[test]
    fn load_garbage_is_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.png");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(load_image(&path).is_err());
    }
}
