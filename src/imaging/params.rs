//! Encoding parameters for derived artifacts.
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: container an artifact is written as, and its quality.

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    /// Preview WebPs.
    pub const PREVIEW: Quality = Quality(85);
    /// Watermarked free-post JPEGs.
    pub const FREE_POST: Quality = Quality(90);
    /// Lossy copies placed in the archive.
    pub const ARCHIVE: Quality = Quality(95);

    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// Output container for one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg(Quality),
    WebP(Quality),
    /// Lossless, keeps the source's alpha channel.
    Png,
}

impl OutputFormat {
    /// File extension written for this format.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg(_) => "jpeg",
            OutputFormat::WebP(_) => "webp",
            OutputFormat::Png => "png",
        }
    }

    /// Archive copy format for a source file extension: JPEG sources stay
    /// JPEG, WebP sources stay WebP, everything else becomes lossless PNG.
    pub fn for_archive(source_ext: &str) -> Self {
        match source_ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => OutputFormat::Jpeg(Quality::ARCHIVE),
            "webp" => OutputFormat::WebP(Quality::ARCHIVE),
            _ => OutputFormat::Png,
        }
    }
}
