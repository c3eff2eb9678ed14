//! Centralized naming for everything the pipeline writes inside a pack.
//!
//! ## Pack layout
//!
//! ```text
//! PackA/
//! ├── metadata.json              filename → metadata
//! ├── characters.txt             "Foo Bar, Baz"
//! ├── PackA-19-10-2026.zip       archive of temp_for_zip/
//! ├── original_images/           sources, moved here after processing
//! ├── preview_Images/image_1.webp
//! ├── free_post/image_1.jpeg     watermarked
//! ├── pixiv_safe/                external transform output
//! └── temp_for_zip/              staging, removed after archiving
//! ```
//!
//! Artifacts are numbered from 1 in sorted source-filename order, so
//! `image_3.*` in every directory comes from the same source.

use chrono::NaiveDate;

pub const ORIGINALS_DIR: &str = "original_images";
pub const PREVIEW_DIR: &str = "preview_Images";
pub const FREE_POST_DIR: &str = "free_post";
pub const PIXIV_SAFE_DIR: &str = "pixiv_safe";
pub const STAGING_DIR: &str = "temp_for_zip";
pub const CHARACTERS_FILE: &str = "characters.txt";

/// Stem shared by all artifacts of the `index`-th source image (1-based).
pub fn artifact_stem(index: usize) -> String {
    format!("image_{index}")
}

/// Artifact filename, e.g. `image_2.webp`.
pub fn artifact_name(index: usize, extension: &str) -> String {
    format!("{}.{extension}", artifact_stem(index))
}

/// `DD-MM-YYYY`, the date format used in archive names.
pub fn format_archive_date(date: NaiveDate) -> String {
    date.format("%d-%m-%Y").to_string()
}

/// Archive filename for a pack, e.g. `PackA-05-03-2026.zip`.
pub fn archive_name(pack_name: &str, date: NaiveDate) -> String {
    format!("{pack_name}-{}.zip", format_archive_date(date))
}
