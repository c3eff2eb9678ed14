//! Image handling for pack artifacts.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Decode** | `image::ImageReader` with content sniffing |
//! | **Flatten alpha** | composite over white before lossy encodes |
//! | **Encode → JPEG / PNG** | `image` codecs |
//! | **Encode → WebP** | `webp` (libwebp) |
//! | **Watermark** | Lanczos3 resize + `imageops::overlay` |
//! | **Text metadata** | `img-parts` chunk/segment surgery + `kamadak-exif` |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for watermark geometry (unit testable)
//! - **Parameters**: Output formats and qualities
//! - **IO**: Decoding, flattening, encoding
//! - **Watermark**: [`Watermark`] compositor and [`Anchor`]
//! - **Container**: PNG comment chunks and EXIF descriptions, no pixel access

mod calculations;
pub mod container;
pub mod io;
mod params;
pub mod watermark;

pub use calculations::{calculate_anchor_offset, calculate_watermark_size};
pub use io::{ImagingError, flatten_on_white, load_image, save_jpeg, save_png, save_webp};
pub use params::{OutputFormat, Quality};
pub use watermark::{Anchor, Watermark, WatermarkError, apply_watermark};
