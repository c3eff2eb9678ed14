//! # Pack Organizer
//!
//! Batch tooling for illustration packs: directories of images that get
//! published in several forms at once. The filesystem is the data source and
//! every artifact lands next to the images it came from.
//!
//! # Architecture: Three Commands Over One Layout
//!
//! ```text
//! 1. extract     images         →  metadata.json          (embedded JSON → sidecar)
//! 2. process     metadata.json  →  previews, free_post/,  (render + archive, then
//!                                  archive, characters.txt  move sources aside)
//! 3. transform   original_images/ → pixiv_safe/           (external service, retried)
//! ```
//!
//! Each command can be rerun on its own. `extract` only reads images;
//! `process` is driven by `metadata.json`, so editing that file between the
//! two steps changes what gets rendered; `transform` only touches
//! `original_images/` and `pixiv_safe/`.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`discover`] | Single-pack vs multi-pack detection, image listing |
//! | [`metadata`] | JSON metadata embedded in PNG `Comment` / EXIF `ImageDescription` |
//! | [`pipeline`] | `extract` and `process`: per-pack worker pools, artifact rendering |
//! | [`transform`] | External transform adapter with retry and copy fallback |
//! | [`archive`] | Flat deflated ZIP of a pack's staging directory |
//! | [`imaging`] | Image IO, container-level text fields, watermark compositing |
//! | [`naming`] | Directory names and artifact filenames inside a pack |
//! | [`config`] | `pack-organizer.toml` loading, layered over stock defaults |
//! | [`progress`] | Progress, log and status events reported while work runs |
//! | [`output`] | CLI summaries printed once a command finishes |
//!
//! # Design Decisions
//!
//! ## Metadata Travels Inside the Image
//!
//! Per-image metadata is a JSON object stored in the file itself: a PNG
//! `Comment` text chunk, or the EXIF `ImageDescription` tag for JPEG and WebP.
//! Every artifact the pipeline writes gets the same object re-embedded, so a
//! preview or a watermarked copy can be traced back without the sidecar.
//! Text that is not valid JSON is never dropped; it is kept verbatim under
//! `raw_comment` / `raw_exif_description` with the parse error alongside.
//!
//! ## Failures Stay Local
//!
//! One bad image does not stop its pack, and one bad pack does not stop the
//! run. Failures are counted, logged through the [`progress`] sink and shown
//! in the final summary.
//!
//! ## A Transform Never Leaves a Hole
//!
//! The external transform is opaque and occasionally flaky. After the
//! configured attempts fail, the original is copied into `pixiv_safe/`
//! instead, so the output directory always mirrors `original_images/`.

pub mod archive;
pub mod config;
pub mod discover;
pub mod imaging;
pub mod metadata;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod transform;

#[cfg(test)]
pub(crate) mod test_helpers;
