//! Batch pipeline over packs.
//!
//! Two operations, both run over the packs found by
//! [`discover`](crate::discover::discover):
//!
//! | Operation | Reads | Writes |
//! |---|---|---|
//! | [`Pipeline::extract_metadata`] | embedded blobs | `metadata.json` |
//! | [`Pipeline::process_images`] | `metadata.json`, sources | previews, free-post copies, archive, `characters.txt`, `original_images/` |
//!
//! ## Execution model
//!
//! Packs run one after another. Inside a pack, per-image work fans out on a
//! rayon pool sized from `processing.max_workers` (capped at the core count)
//! and results are collected after the join, so workers share nothing mutable
//! but the sink. Artifact indices are assigned from sorted filenames before
//! the fan-out, which keeps naming deterministic regardless of scheduling.
//!
//! ## Failure scope
//!
//! | Failure | Effect |
//! |---|---|
//! | root missing, watermark unreadable | FATAL, run returns `Err` before touching a pack |
//! | no packs found | WARN, [`PipelineError::NothingToDo`] |
//! | `metadata.json` missing / unreadable | pack skipped |
//! | decode or encode failure | that image's artifacts skipped |
//! | embed failure, move failure | logged, processing continues |
//!
//! Progress advances once per pack and is reset to 0 when the run ends,
//! whatever the outcome.

use crate::archive::create_archive;
use crate::config::{OrganizerConfig, effective_threads};
use crate::discover::{DiscoveryError, DiscoveryMode, discover, list_images};
use crate::imaging::{
    ImagingError, OutputFormat, Quality, Watermark, WatermarkError, flatten_on_white,
    load_image, save_jpeg, save_png, save_webp,
};
use crate::metadata::{
    METADATA_FILE, MetadataCodec, MetadataError, MetadataObject, PackMetadata, character_list,
    load_pack_metadata, save_pack_metadata,
};
use crate::naming::{
    CHARACTERS_FILE, FREE_POST_DIR, ORIGINALS_DIR, PIXIV_SAFE_DIR, PREVIEW_DIR, STAGING_DIR,
    archive_name, artifact_name,
};
use crate::progress::Reporter;
use chrono::NaiveDate;
use image::DynamicImage;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),
    #[error("No packs found under {0}")]
    NothingToDo(PathBuf),
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Why a pack was skipped without producing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoImages,
    MissingMetadata,
    UnreadableMetadata,
    NoMatchingImages,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::NoImages => "no images",
            SkipReason::MissingMetadata => "metadata.json missing",
            SkipReason::UnreadableMetadata => "metadata.json unreadable",
            SkipReason::NoMatchingImages => "no images listed in metadata.json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackStatus {
    Completed,
    Skipped(SkipReason),
    Failed(String),
}

/// Outcome of one pack in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackReport {
    pub name: String,
    pub path: PathBuf,
    pub status: PackStatus,
    /// Images extracted or rendered successfully.
    pub processed: usize,
    pub failed: usize,
    /// Originals moved into `original_images/`.
    pub moved: usize,
    pub metadata_file: Option<PathBuf>,
    pub archive: Option<PathBuf>,
    pub characters: Vec<String>,
}

impl PackReport {
    fn new(name: &str, path: &Path) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            status: PackStatus::Completed,
            processed: 0,
            failed: 0,
            moved: 0,
            metadata_file: None,
            archive: None,
            characters: Vec::new(),
        }
    }

    fn skipped(name: &str, path: &Path, reason: SkipReason) -> Self {
        Self {
            status: PackStatus::Skipped(reason),
            ..Self::new(name, path)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: DiscoveryMode,
    pub packs: Vec<PackReport>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.packs.iter().map(|p| p.processed).sum()
    }

    pub fn failed(&self) -> usize {
        self.packs.iter().map(|p| p.failed).sum()
    }
}

/// Directories one pack's artifacts are written into.
struct ArtifactDirs {
    preview: PathBuf,
    free_post: PathBuf,
    staging: PathBuf,
}

/// Display name of a pack: its directory name.
pub fn pack_name(pack: &Path) -> String {
    pack.file_name()
        .map(|n| n.to_os_string())
        .or_else(|| {
            // `.` and friends have no file name of their own
            pack.canonicalize().ok()?.file_name().map(|n| n.to_os_string())
        })
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pack".to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct Pipeline<'a> {
    config: &'a OrganizerConfig,
    reporter: Reporter<'a>,
    codec: MetadataCodec,
    archive_date: Option<NaiveDate>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a OrganizerConfig, reporter: Reporter<'a>) -> Self {
        Self {
            config,
            reporter,
            codec: MetadataCodec::new(config.metadata.max_embed_bytes),
            archive_date: None,
        }
    }

    /// Fix the date used in archive names instead of taking today's.
    pub fn with_archive_date(mut self, date: NaiveDate) -> Self {
        self.archive_date = Some(date);
        self
    }

    // ========================================================================
    // extract_metadata
    // ========================================================================

    /// Read the embedded metadata of every image and write each pack's
    /// `metadata.json`.
    pub fn extract_metadata(&self, root: &Path) -> Result<RunReport, PipelineError> {
        let result = self.run_packs(root, "Extracting metadata from", |pack, name, pool| {
            self.extract_pack(pack, name, pool)
        });
        self.reporter.reset();
        result
    }

    fn extract_pack(
        &self,
        pack: &Path,
        name: &str,
        pool: &ThreadPool,
    ) -> Result<PackReport, MetadataError> {
        let images = list_images(pack)?;
        if images.is_empty() {
            self.reporter.warn(&format!("No images found in {name}, skipping"));
            return Ok(PackReport::skipped(name, pack, SkipReason::NoImages));
        }

        let results: Vec<(String, Result<_, MetadataError>)> = pool.install(|| {
            images
                .par_iter()
                .map(|path| (file_name(path), self.codec.extract(path)))
                .collect()
        });

        let mut report = PackReport::new(name, pack);
        let mut pack_metadata = PackMetadata::new();
        for (file, result) in results {
            match result {
                Ok(extraction) => {
                    if extraction.is_raw() {
                        self.reporter.warn(&format!(
                            "Metadata in {name}/{file} is not valid JSON, keeping raw text"
                        ));
                    }
                    pack_metadata.insert(file, extraction.into_object());
                    report.processed += 1;
                }
                Err(e) => {
                    self.reporter
                        .error(&format!("Failed to read metadata from {name}/{file}: {e}"));
                    report.failed += 1;
                }
            }
        }

        if !pack_metadata.is_empty() {
            let path = save_pack_metadata(pack, &pack_metadata)?;
            self.reporter.success(&format!(
                "{METADATA_FILE} written for {name} ({} images)",
                pack_metadata.len()
            ));
            report.metadata_file = Some(path);
        }
        Ok(report)
    }

    // ========================================================================
    // process_images
    // ========================================================================

    /// Generate previews, watermarked copies and the archive for every pack,
    /// then move the originals away.
    pub fn process_images(&self, root: &Path) -> Result<RunReport, PipelineError> {
        let result = self.process_images_inner(root);
        self.reporter.reset();
        result
    }

    fn process_images_inner(&self, root: &Path) -> Result<RunReport, PipelineError> {
        let watermark = match Watermark::load(&self.config.watermark) {
            Ok(w) => w,
            Err(e) => {
                self.reporter.fatal(&format!("Cannot use watermark: {e}"));
                return Err(e.into());
            }
        };
        let (w, h) = watermark.dimensions();
        self.reporter.info(&format!(
            "Watermark {} ({w}x{h}) anchored {}",
            self.config.watermark.path.display(),
            watermark.anchor()
        ));
        let date = self
            .archive_date
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        self.run_packs(root, "Processing", |pack, name, pool| {
            self.process_pack(pack, name, pool, &watermark, date)
        })
    }

    fn process_pack(
        &self,
        pack: &Path,
        name: &str,
        pool: &ThreadPool,
        watermark: &Watermark,
        date: NaiveDate,
    ) -> Result<PackReport, MetadataError> {
        let dirs = ArtifactDirs {
            preview: pack.join(PREVIEW_DIR),
            free_post: pack.join(FREE_POST_DIR),
            staging: pack.join(STAGING_DIR),
        };
        for dir in [&dirs.preview, &dirs.free_post, &dirs.staging] {
            std::fs::create_dir_all(dir)?;
        }

        if !pack.join(METADATA_FILE).is_file() {
            self.reporter
                .warn(&format!("{METADATA_FILE} not found in {name}, skipping"));
            self.remove_staging(&dirs.staging);
            return Ok(PackReport::skipped(name, pack, SkipReason::MissingMetadata));
        }
        let pack_metadata = match load_pack_metadata(pack) {
            Ok(m) => m,
            Err(e) => {
                self.reporter
                    .error(&format!("Cannot read {METADATA_FILE} in {name}: {e}"));
                self.remove_staging(&dirs.staging);
                return Ok(PackReport::skipped(
                    name,
                    pack,
                    SkipReason::UnreadableMetadata,
                ));
            }
        };

        let mut report = PackReport::new(name, pack);
        report.characters = character_list(&pack_metadata);
        if !report.characters.is_empty() {
            std::fs::write(pack.join(CHARACTERS_FILE), report.characters.join(", "))?;
            self.reporter
                .info(&format!("{CHARACTERS_FILE} written for {name}"));
        }

        // Index from the sorted listing so image_N always maps to the same
        // source no matter how workers are scheduled.
        let jobs: Vec<(usize, PathBuf, &MetadataObject)> = list_images(pack)?
            .into_iter()
            .filter_map(|path| {
                let metadata = pack_metadata.get(&file_name(&path))?;
                Some((path, metadata))
            })
            .enumerate()
            .map(|(i, (path, metadata))| (i + 1, path, metadata))
            .collect();

        if jobs.is_empty() {
            self.reporter.warn(&format!(
                "No images in {name} are listed in {METADATA_FILE}, skipping"
            ));
            self.remove_staging(&dirs.staging);
            return Ok(PackReport::skipped(name, pack, SkipReason::NoMatchingImages));
        }

        let results: Vec<(String, Result<(), ImagingError>)> = pool.install(|| {
            jobs.par_iter()
                .map(|(index, source, metadata)| {
                    let result = self.render_artifacts(*index, source, metadata, &dirs, watermark);
                    (file_name(source), result)
                })
                .collect()
        });
        for (file, result) in results {
            match result {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    self.reporter
                        .error(&format!("Failed to process {name}/{file}: {e}"));
                    report.failed += 1;
                }
            }
        }

        report.archive = self.archive_pack(pack, name, &dirs.staging, date);
        self.remove_staging(&dirs.staging);
        report.moved = self.move_originals(pack, name)?;

        self.reporter.success(&format!(
            "{name}: {} processed, {} failed",
            report.processed, report.failed
        ));
        Ok(report)
    }

    /// Write the preview, staged archive copy and watermarked free-post copy
    /// of one source image.
    ///
    /// The set is all-or-nothing: on error, artifacts already written for
    /// this image are removed.
    fn render_artifacts(
        &self,
        index: usize,
        source: &Path,
        metadata: &MetadataObject,
        dirs: &ArtifactDirs,
        watermark: &Watermark,
    ) -> Result<(), ImagingError> {
        let mut written = Vec::with_capacity(3);
        let result = self.write_artifacts(index, source, metadata, dirs, watermark, &mut written);
        if result.is_err() {
            for path in &written {
                if let Err(e) = std::fs::remove_file(path) {
                    log::debug!("could not remove partial artifact {}: {e}", path.display());
                }
            }
        }
        result
    }

    fn write_artifacts(
        &self,
        index: usize,
        source: &Path,
        metadata: &MetadataObject,
        dirs: &ArtifactDirs,
        watermark: &Watermark,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), ImagingError> {
        let original = load_image(source)?;
        let flat = flatten_on_white(&original);

        let preview_format = OutputFormat::WebP(Quality::PREVIEW);
        let preview = dirs
            .preview
            .join(artifact_name(index, preview_format.extension()));
        written.push(preview.clone());
        save_webp(&flat, &preview, Quality::PREVIEW)?;
        self.embed_or_warn(&preview, metadata);

        let source_ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let archive_format = OutputFormat::for_archive(&source_ext);
        let staged = dirs
            .staging
            .join(artifact_name(index, archive_format.extension()));
        written.push(staged.clone());
        match archive_format {
            OutputFormat::Jpeg(q) => save_jpeg(&flat, &staged, q)?,
            OutputFormat::WebP(q) => save_webp(&flat, &staged, q)?,
            OutputFormat::Png => save_png(&original, &staged)?,
        }
        self.embed_or_warn(&staged, metadata);

        let free_post_format = OutputFormat::Jpeg(Quality::FREE_POST);
        let free_post = dirs
            .free_post
            .join(artifact_name(index, free_post_format.extension()));
        written.push(free_post.clone());
        let marked = watermark.apply(&DynamicImage::ImageRgb8(flat));
        save_jpeg(&marked, &free_post, Quality::FREE_POST)?;
        self.embed_or_warn(&free_post, metadata);

        Ok(())
    }

    fn embed_or_warn(&self, path: &Path, metadata: &MetadataObject) {
        if let Err(e) = self.codec.embed(path, metadata) {
            self.reporter.warn(&format!(
                "Failed to embed metadata in {}: {e}",
                path.display()
            ));
        }
    }

    fn archive_pack(
        &self,
        pack: &Path,
        name: &str,
        staging: &Path,
        date: NaiveDate,
    ) -> Option<PathBuf> {
        let zip_path = pack.join(archive_name(name, date));
        match create_archive(staging, &zip_path) {
            Ok(count) => {
                self.reporter.success(&format!(
                    "Archive {} created ({count} files)",
                    file_name(&zip_path)
                ));
                Some(zip_path)
            }
            Err(e) => {
                self.reporter
                    .error(&format!("Failed to create archive for {name}: {e}"));
                None
            }
        }
    }

    fn remove_staging(&self, staging: &Path) {
        if !staging.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(staging) {
            self.reporter.warn(&format!(
                "Could not remove staging directory {}: {e}",
                staging.display()
            ));
        }
    }

    /// Rename every top-level source image into `original_images/`.
    fn move_originals(&self, pack: &Path, name: &str) -> Result<usize, std::io::Error> {
        let originals = pack.join(ORIGINALS_DIR);
        std::fs::create_dir_all(&originals)?;

        let mut moved = 0;
        for source in list_images(pack)? {
            let file = file_name(&source);
            match std::fs::rename(&source, originals.join(&file)) {
                Ok(()) => moved += 1,
                Err(e) => self
                    .reporter
                    .error(&format!("Failed to move {name}/{file}: {e}")),
            }
        }
        Ok(moved)
    }

    // ========================================================================
    // Shared pack loop
    // ========================================================================

    fn run_packs<F>(&self, root: &Path, verb: &str, mut per_pack: F) -> Result<RunReport, PipelineError>
    where
        F: FnMut(&Path, &str, &ThreadPool) -> Result<PackReport, MetadataError>,
    {
        let discovery = match discover(root) {
            Ok(d) => d,
            Err(e) => {
                self.reporter.fatal(&e.to_string());
                return Err(e.into());
            }
        };
        self.reporter.info(&format!(
            "{} mode: {} pack(s) under {}",
            discovery.mode,
            discovery.packs.len(),
            root.display()
        ));
        if discovery.packs.is_empty() {
            self.reporter
                .warn(&format!("No packs found under {}", root.display()));
            return Err(PipelineError::NothingToDo(root.to_path_buf()));
        }

        let threads = effective_threads(&self.config.processing);
        let total = discovery.packs.len();
        let mut reports = Vec::with_capacity(total);
        for (i, pack) in discovery.packs.iter().enumerate() {
            let name = pack_name(pack);
            self.reporter
                .status(&format!("{verb} {name} ({}/{total})", i + 1));

            let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
            let report = per_pack(pack, &name, &pool).unwrap_or_else(|e| {
                self.reporter.error(&format!("Pack {name} failed: {e}"));
                PackReport {
                    status: PackStatus::Failed(e.to_string()),
                    ..PackReport::new(&name, pack)
                }
            });
            reports.push(report);
            self.reporter.fraction(i + 1, total);
        }

        Ok(RunReport {
            mode: discovery.mode,
            packs: reports,
        })
    }
}

// ============================================================================
// Pack info
// ============================================================================

/// Snapshot of a pack's on-disk state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackInfo {
    pub name: String,
    pub path: PathBuf,
    pub has_metadata: bool,
    pub has_original_images: bool,
    pub has_pixiv_safe: bool,
    /// Recognized images still at the top level.
    pub images: usize,
    pub previews: usize,
    pub free_post: usize,
    pub originals: usize,
    pub pixiv_safe: usize,
}

fn count_images(dir: &Path) -> Result<usize, std::io::Error> {
    if dir.is_dir() {
        Ok(list_images(dir)?.len())
    } else {
        Ok(0)
    }
}

/// Inspect a pack directory without modifying it.
pub fn pack_info(pack: &Path) -> Result<PackInfo, DiscoveryError> {
    if !pack.is_dir() {
        return Err(DiscoveryError::RootNotFound(pack.to_path_buf()));
    }
    Ok(PackInfo {
        name: pack_name(pack),
        path: pack.to_path_buf(),
        has_metadata: pack.join(METADATA_FILE).is_file(),
        has_original_images: pack.join(ORIGINALS_DIR).is_dir(),
        has_pixiv_safe: pack.join(PIXIV_SAFE_DIR).is_dir(),
        images: count_images(pack)?,
        previews: count_images(&pack.join(PREVIEW_DIR))?,
        free_post: count_images(&pack.join(FREE_POST_DIR))?,
        originals: count_images(&pack.join(ORIGINALS_DIR))?,
        pixiv_safe: count_images(&pack.join(PIXIV_SAFE_DIR))?,
    })
}
