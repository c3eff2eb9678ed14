//! Pack image metadata: a JSON object embedded inside each image file.
//!
//! ## Where the blob lives
//!
//! | Suffix | Carrier |
//! |---|---|
//! | `.png` | `Comment` text chunk (`tEXt` when Latin-1, `iTXt` otherwise) |
//! | `.jpg`, `.jpeg`, `.webp` | EXIF `ImageDescription` |
//!
//! PNG files are also checked for an EXIF description on read, since some
//! tools write one there.
//!
//! ## Resolution priority
//!
//! The first non-empty value wins:
//!
//! ```text
//! source = EXIF description → PNG comment → "{}"
//! ```
//!
//! The description is the newer location, so it beats a stale comment left on
//! the same file.
//!
//! ## Malformed blobs
//!
//! Extraction never fails on bad JSON. Text that does not parse as a JSON
//! object comes back as [`RawFallback`], which preserves both raw fields and
//! the parse error so nothing typed by a human is lost:
//!
//! ```json
//! {
//!   "raw_comment": "not json",
//!   "raw_exif_description": null,
//!   "_parse_error": "expected value at line 1 column 1",
//!   "_metadata_source": "not json"
//! }
//! ```
//!
//! ## Size ceiling
//!
//! Compact serialized JSON longer than the configured ceiling
//! ([`DEFAULT_MAX_EMBED_BYTES`] unless overridden) is rejected before the
//! file is touched. Blobs are never truncated.

use crate::imaging::container::{
    ContainerError, EmbeddedText, read_embedded_text, replace_file, write_exif_description,
    write_png_comment,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default ceiling for the compact JSON blob, a safety margin under the
/// 64 KiB limit of a single EXIF segment.
pub const DEFAULT_MAX_EMBED_BYTES: usize = 60_000;

/// Largest configurable ceiling. A JPEG APP1 segment carries at most 65533
/// bytes including the EXIF header and IFD.
pub const MAX_EMBED_BYTES_LIMIT: usize = 65_000;

/// Sidecar mapping original filenames to their metadata.
pub const METADATA_FILE: &str = "metadata.json";

/// Metadata embedded in one image.
pub type MetadataObject = Map<String, Value>;

/// Filename → metadata for one pack, in filename order.
pub type PackMetadata = BTreeMap<String, MetadataObject>;

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read image container {path}: {source}")]
    Decode {
        path: PathBuf,
        source: ContainerError,
    },
    #[error("Metadata is {size} bytes, over the {limit} byte limit")]
    SizeExceeded { size: usize, limit: usize },
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raw text preserved when the embedded blob is not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFallback {
    pub raw_comment: Option<String>,
    pub raw_exif_description: Option<String>,
    #[serde(rename = "_parse_error")]
    pub parse_error: String,
    /// The text that was parsed. `None` when nothing was embedded.
    #[serde(rename = "_metadata_source")]
    pub metadata_source: Option<String>,
}

impl RawFallback {
    pub fn into_object(self) -> MetadataObject {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Result of reading an image's embedded metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Parsed(MetadataObject),
    Raw(RawFallback),
}

impl Extraction {
    pub fn is_raw(&self) -> bool {
        matches!(self, Extraction::Raw(_))
    }

    /// Flatten into the object stored in `metadata.json`.
    pub fn into_object(self) -> MetadataObject {
        match self {
            Extraction::Parsed(map) => map,
            Extraction::Raw(raw) => raw.into_object(),
        }
    }
}

/// Resolve the embedded text fields of one image into metadata.
pub fn resolve_extraction(text: EmbeddedText) -> Extraction {
    let EmbeddedText {
        comment,
        description,
        ..
    } = text;
    let source = description.as_deref().or(comment.as_deref());

    let parsed = match source {
        None => return Extraction::Parsed(Map::new()),
        Some(s) => serde_json::from_str::<Value>(s),
    };
    let parse_error = match parsed {
        Ok(Value::Object(map)) => return Extraction::Parsed(map),
        Ok(other) => format!("expected a JSON object, found {}", json_kind(&other)),
        Err(e) => e.to_string(),
    };

    let metadata_source = source.map(str::to_string);
    Extraction::Raw(RawFallback {
        raw_comment: comment,
        raw_exif_description: description,
        parse_error,
        metadata_source,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Reads and writes the metadata blob inside image files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataCodec {
    max_embed_bytes: usize,
}

impl Default for MetadataCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EMBED_BYTES)
    }
}

impl MetadataCodec {
    pub fn new(max_embed_bytes: usize) -> Self {
        Self { max_embed_bytes }
    }

    pub fn max_embed_bytes(&self) -> usize {
        self.max_embed_bytes
    }

    /// Read an image's embedded metadata.
    ///
    /// Fails only when the file cannot be read or its container cannot be
    /// parsed; malformed JSON yields [`Extraction::Raw`].
    pub fn extract(&self, path: &Path) -> Result<Extraction, MetadataError> {
        let data = std::fs::read(path)?;
        let text = read_embedded_text(data).map_err(|source| MetadataError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(resolve_extraction(text))
    }

    /// Serialize `metadata`, rejecting blobs over the ceiling.
    fn encode_within_ceiling(&self, metadata: &MetadataObject) -> Result<String, MetadataError> {
        let json = serde_json::to_string(metadata)?;
        if json.len() > self.max_embed_bytes {
            return Err(MetadataError::SizeExceeded {
                size: json.len(),
                limit: self.max_embed_bytes,
            });
        }
        Ok(json)
    }

    /// Embed `metadata` into the image at `path`, replacing any previous blob.
    ///
    /// Empty metadata leaves the file untouched. The carrier is chosen from
    /// the file suffix; pixel data is copied through unchanged.
    pub fn embed(&self, path: &Path, metadata: &MetadataObject) -> Result<(), MetadataError> {
        if metadata.is_empty() {
            return Ok(());
        }

        let json = self.encode_within_ceiling(metadata)?;

        let suffix = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let writer: fn(Vec<u8>, &str) -> Result<Vec<u8>, ContainerError> = match suffix.as_str() {
            "png" => write_png_comment,
            "jpg" | "jpeg" | "webp" => write_exif_description,
            _ => return Err(MetadataError::UnsupportedFormat(path.to_path_buf())),
        };

        let data = std::fs::read(path)?;
        let rewritten = writer(data, &json).map_err(|source| MetadataError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        replace_file(path, &rewritten)?;
        Ok(())
    }
}

// ============================================================================
// Pack sidecars
// ============================================================================

/// Load `metadata.json` from a pack directory.
pub fn load_pack_metadata(pack: &Path) -> Result<PackMetadata, MetadataError> {
    let content = std::fs::read_to_string(pack.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write `metadata.json` into a pack directory, pretty-printed with
/// non-ASCII text left unescaped.
pub fn save_pack_metadata(pack: &Path, metadata: &PackMetadata) -> Result<PathBuf, MetadataError> {
    let path = pack.join(METADATA_FILE);
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Distinct character names across a pack, in first-seen filename order.
///
/// Underscores become spaces and the result is trimmed. Comparison is
/// case-sensitive: `Foo_Bar` and `foo_bar` are two characters.
pub fn character_list(metadata: &PackMetadata) -> Vec<String> {
    let mut characters: Vec<String> = Vec::new();
    for object in metadata.values() {
        let Some(Value::String(tag)) = object.get("character") else {
            continue;
        };
        let cleaned = tag.replace('_', " ").trim().to_string();
        if !cleaned.is_empty() && !characters.contains(&cleaned) {
            characters.push(cleaned);
        }
    }
    characters
}
