//! Pack discovery.
//!
//! A root is interpreted one of two ways:
//!
//! ```text
//! root/                      single-pack mode: root itself is the pack
//! ├── 01.png
//! └── 02.jpg
//!
//! root/                      multi-pack mode: each subdirectory is a pack
//! ├── PackA/
//! ├── PackB/
//! ├── .cache/                hidden, skipped
//! └── original_images/       pipeline-managed, skipped
//! ```
//!
//! Any recognized image directly inside the root selects single-pack mode.

use crate::naming::{FREE_POST_DIR, ORIGINALS_DIR, PIXIV_SAFE_DIR, PREVIEW_DIR};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions treated as pack images, matched case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Subdirectories the pipeline creates inside a pack. Never treated as packs.
pub const RESERVED_DIRS: &[&str] = &[ORIGINALS_DIR, FREE_POST_DIR, PREVIEW_DIR, PIXIV_SAFE_DIR];

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Root directory not found: {0}")]
    RootNotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    SinglePack,
    MultiPack,
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscoveryMode::SinglePack => "single-pack",
            DiscoveryMode::MultiPack => "multi-pack",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub mode: DiscoveryMode,
    pub packs: Vec<PathBuf>,
}

/// Whether `path` has a recognized image extension. Does not touch the disk.
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Regular files directly inside `dir` with a recognized extension, sorted
/// by filename.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_image_extension(&path) {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

fn is_candidate_pack(name: &str) -> bool {
    !name.starts_with('.') && !RESERVED_DIRS.contains(&name)
}

/// Find the packs under `root`.
pub fn discover(root: &Path) -> Result<Discovery, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
    }

    if !list_images(root)?.is_empty() {
        return Ok(Discovery {
            mode: DiscoveryMode::SinglePack,
            packs: vec![root.to_path_buf()],
        });
    }

    let mut packs = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if is_candidate_pack(&name.to_string_lossy()) {
            packs.push(entry.path());
        }
    }
    packs.sort();

    Ok(Discovery {
        mode: DiscoveryMode::MultiPack,
        packs,
    })
}
