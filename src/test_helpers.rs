//! Shared test utilities for the pack-organizer test suite.
//!
//! Provides in-memory image builders, encoders that produce real container
//! bytes, pack directory fixtures and a [`RecordingSink`] that captures every
//! progress, log and status event for assertions.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let pack = make_pack(tmp.path(), "PackA");
//! write_png(&pack.join("a.png"), &DynamicImage::ImageRgb8(solid_rgb(8, 8, [0, 0, 0])));
//!
//! let sink = RecordingSink::default();
//! // ... run something with Reporter::new(&sink)
//! assert_eq!(sink.progress_values().last(), Some(&0));
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use crate::progress::{LogLevel, ProgressSink};

// =========================================================================
// Recording sink
// =========================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Progress(u8),
    Log(String, LogLevel),
    Status(String),
}

/// Sink that stores every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn logs(&self) -> Vec<(String, LogLevel)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Log(msg, level) => Some((msg, level)),
                _ => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Messages logged at `level`.
    pub fn logs_at(&self, level: LogLevel) -> Vec<String> {
        self.logs()
            .into_iter()
            .filter(|(_, l)| *l == level)
            .map(|(m, _)| m)
            .collect()
    }

    /// True when any log at `level` contains `needle`.
    pub fn has_log(&self, level: LogLevel, needle: &str) -> bool {
        self.logs_at(level).iter().any(|m| m.contains(needle))
    }
}

impl ProgressSink for RecordingSink {
    fn progress(&self, percent: u8) {
        self.events.lock().unwrap().push(Event::Progress(percent));
    }

    fn log(&self, message: &str, level: LogLevel) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Log(message.to_string(), level));
    }

    fn status(&self, text: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Status(text.to_string()));
    }
}

// =========================================================================
// Image builders and encoders
// =========================================================================

pub fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(color))
}

pub fn solid_rgba(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

pub fn encode_png(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn encode_jpeg(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    img.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, 90))
        .unwrap();
    buf
}

pub fn encode_webp(img: &RgbImage) -> Vec<u8> {
    let (w, h) = img.dimensions();
    webp::Encoder::from_rgb(img.as_raw(), w, h)
        .encode_simple(false, 90.0)
        .unwrap()
        .to_vec()
}

pub fn write_png(path: &Path, img: &DynamicImage) {
    std::fs::write(path, encode_png(img)).unwrap();
}

pub fn write_jpeg(path: &Path, img: &RgbImage) {
    std::fs::write(path, encode_jpeg(img)).unwrap();
}

pub fn write_webp(path: &Path, img: &RgbImage) {
    std::fs::write(path, encode_webp(img)).unwrap();
}

// =========================================================================
// Pack fixtures
// =========================================================================

/// Create `root/name/` and return its path.
pub fn make_pack(root: &Path, name: &str) -> PathBuf {
    let pack = root.join(name);
    std::fs::create_dir_all(&pack).unwrap();
    pack
}

/// Sorted file names directly inside `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
