//! CLI output formatting for every command.
//!
//! Output is **pack-centric**: each pack leads with its positional index and
//! name, with paths and counts as indented context lines. The progress sink
//! reports *while* work happens; these summaries print once it is done.
//!
//! # Output Format
//!
//! ## extract / process
//!
//! ```text
//! Packs (multi-pack)
//! 001 PackA
//!     Source: root/PackA/
//!     12 processed, 0 failed, 12 moved
//!     Archive: PackA-19-10-2026.zip
//!     Characters: Miku, Rin
//! 002 PackB (skipped: no images)
//!
//! 12 images in 1 pack, 0 failed
//! ```
//!
//! ## transform
//!
//! ```text
//! 001 PackA → root/PackA/pixiv_safe/
//!     10 transformed, 2 copied, 0 failed
//! ```
//!
//! ## info
//!
//! ```text
//! PackA
//!     Source: root/PackA/
//!     Images: 4
//!     metadata.json: yes
//!     preview_Images: 4
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::naming::{FREE_POST_DIR, ORIGINALS_DIR, PIXIV_SAFE_DIR, PREVIEW_DIR};
use crate::pipeline::{PackInfo, PackReport, PackStatus, RunReport};
use crate::transform::{DescriptorInfo, TransformReport};
use std::path::Path;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

// ============================================================================
// extract / process
// ============================================================================

fn pack_lines(index: usize, pack: &PackReport) -> Vec<String> {
    let header = format!("{} {}", format_index(index), pack.name);
    match &pack.status {
        PackStatus::Skipped(reason) => return vec![format!("{header} (skipped: {reason})")],
        PackStatus::Failed(msg) => return vec![format!("{header} (failed: {msg})")],
        PackStatus::Completed => {}
    }

    let ctx = indent(1);
    let mut lines = vec![header, format!("{ctx}Source: {}/", pack.path.display())];

    let mut counts = format!("{} processed, {} failed", pack.processed, pack.failed);
    if pack.moved > 0 {
        counts.push_str(&format!(", {} moved", pack.moved));
    }
    lines.push(format!("{ctx}{counts}"));

    if let Some(path) = &pack.metadata_file {
        lines.push(format!("{ctx}Metadata: {}", file_name(path)));
    }
    if let Some(path) = &pack.archive {
        lines.push(format!("{ctx}Archive: {}", file_name(path)));
    }
    if !pack.characters.is_empty() {
        lines.push(format!("{ctx}Characters: {}", pack.characters.join(", ")));
    }
    lines
}

/// Format the summary of an `extract` or `process` run.
pub fn format_run_report(report: &RunReport) -> Vec<String> {
    let mut lines = vec![format!("Packs ({})", report.mode)];
    for (i, pack) in report.packs.iter().enumerate() {
        lines.extend(pack_lines(i + 1, pack));
    }

    let completed = report
        .packs
        .iter()
        .filter(|p| p.status == PackStatus::Completed)
        .count();
    lines.push(String::new());
    lines.push(format!(
        "{} in {}, {} failed",
        plural(report.processed(), "image"),
        plural(completed, "pack"),
        report.failed()
    ));
    lines
}

pub fn print_run_report(report: &RunReport) {
    for line in format_run_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// transform
// ============================================================================

/// Format one pack's transform summary.
pub fn format_transform_report(index: usize, report: &TransformReport) -> Vec<String> {
    vec![
        format!(
            "{} {} → {}/",
            format_index(index),
            report.name,
            report.output_dir.display()
        ),
        format!(
            "{}{} transformed, {} copied, {} failed",
            indent(1),
            report.transformed,
            report.fallback,
            report.failed
        ),
    ]
}

pub fn print_transform_report(index: usize, report: &TransformReport) {
    for line in format_transform_report(index, report) {
        println!("{}", line);
    }
}

// ============================================================================
// info
// ============================================================================

/// Format a pack snapshot, plus the workflow descriptor when available.
pub fn format_pack_info(info: &PackInfo, descriptor: Option<&DescriptorInfo>) -> Vec<String> {
    let ctx = indent(1);
    let mut lines = vec![
        info.name.clone(),
        format!("{ctx}Source: {}/", info.path.display()),
        format!("{ctx}Images: {}", info.images),
        format!("{ctx}metadata.json: {}", yes_no(info.has_metadata)),
    ];

    // artifact dirs only when populated; input/output dirs whenever present
    let dirs = [
        (PREVIEW_DIR, info.previews, info.previews > 0),
        (FREE_POST_DIR, info.free_post, info.free_post > 0),
        (ORIGINALS_DIR, info.originals, info.has_original_images),
        (PIXIV_SAFE_DIR, info.pixiv_safe, info.has_pixiv_safe),
    ];
    for (name, count, shown) in dirs {
        if shown {
            lines.push(format!("{ctx}{name}: {count}"));
        }
    }

    if let Some(d) = descriptor {
        lines.push(String::new());
        lines.push("Workflow".to_string());
        lines.push(format!("{ctx}Source: {}", d.path.display()));
        lines.push(format!("{ctx}Nodes: {}", d.node_count));
        lines.push(format!("{ctx}Size: {:.1} KB", d.size_kb));
    }
    lines
}

pub fn print_pack_info(info: &PackInfo, descriptor: Option<&DescriptorInfo>) {
    for line in format_pack_info(info, descriptor) {
        println!("{}", line);
    }
}
