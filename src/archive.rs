//! Pack archive creation.
//!
//! The archive is a flat ZIP of the staging directory: one entry per regular
//! file, named by its bare filename, in sorted order, with no directory
//! entries. Entries are deflated at level 1. The content is already-compressed
//! image data, so higher levels cost time and gain almost nothing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const DEFLATE_LEVEL: i64 = 1;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("Staging directory has no files: {0}")]
    Empty(PathBuf),
}

/// Regular files directly inside `dir`, sorted by filename.
fn staged_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Zip every file in `staging` into `zip_path`. Returns the entry count.
///
/// An existing archive at `zip_path` is overwritten.
pub fn create_archive(staging: &Path, zip_path: &Path) -> Result<usize, ArchiveError> {
    let files = staged_files(staging)?;
    if files.is_empty() {
        return Err(ArchiveError::Empty(staging.to_path_buf()));
    }

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(DEFLATE_LEVEL));

    let mut zip = ZipWriter::new(BufWriter::new(File::create(zip_path)?));
    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(name, options)?;
        zip.write_all(&std::fs::read(file)?)?;
    }
    zip.finish()?.flush()?;

    log::debug!("archived {} files into {}", files.len(), zip_path.display());
    Ok(files.len())
}
