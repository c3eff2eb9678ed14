//! External image transform with retry and copy fallback.
//!
//! Pack originals are routed through an out-of-process transform (a script
//! driving a mosaic workflow) and written to `pixiv_safe/`. The service is
//! opaque: it gets a workflow descriptor, an input and an output path, and
//! either produces the output or it does not.
//!
//! ```text
//! [interpreter] <script> <descriptor> <input> <output>
//! ```
//!
//! An attempt succeeds only when the process exits 0 **and** the output file
//! exists. Each attempt is bounded by `transform.timeout_secs`; an overdue
//! child is killed and reaped.
//!
//! ## Retry and fallback
//!
//! [`Transformer::transform_with_retry`] makes up to `transform.retries`
//! attempts. When all fail, the input is copied verbatim to the output so the
//! pack is never left with a hole, and the copy counts as success
//! ([`TransformOutcome::FallbackCopy`]). Only a failed copy is a failure.
//!
//! Metadata from the pack's `metadata.json` is re-embedded into every output,
//! transformed or copied.
//!
//! The subprocess sits behind [`TransformBackend`] so the retry logic can be
//! driven by an in-process fake.

use crate::config::TransformConfig;
use crate::discover::list_images;
use crate::metadata::{
    METADATA_FILE, MetadataCodec, MetadataObject, PackMetadata, load_pack_metadata,
};
use crate::naming::{ORIGINALS_DIR, PIXIV_SAFE_DIR};
use crate::pipeline::pack_name;
use crate::progress::Reporter;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};
use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const PIPE_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transform script not found: {0}")]
    ScriptNotFound(PathBuf),
    #[error("Workflow descriptor not found: {0}")]
    DescriptorNotFound(PathBuf),
    #[error("Workflow descriptor {path} is not valid JSON: {source}")]
    InvalidDescriptor {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Input not found: {0}")]
    InputNotFound(PathBuf),
    #[error("Directory '{ORIGINALS_DIR}' not found in {0}")]
    MissingOriginals(PathBuf),
    #[error("Failed to start transform: {0}")]
    Spawn(std::io::Error),
    #[error("Transform exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("Transform produced no output at {0}")]
    MissingOutput(PathBuf),
    #[error("Transform timed out after {0} seconds")]
    Timeout(u64),
}

/// One attempt at transforming `input` into `output`.
pub trait TransformBackend: Send + Sync {
    fn attempt(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), TransformError>;
}

/// Runs the transform script as a child process.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    interpreter: Option<String>,
    script: PathBuf,
    descriptor: PathBuf,
}

impl ProcessBackend {
    pub fn from_config(config: &TransformConfig) -> Self {
        let interpreter = Some(config.interpreter.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            interpreter,
            script: config.script.clone(),
            descriptor: config.descriptor.clone(),
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = match &self.interpreter {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg(&self.script);
                cmd
            }
            None => Command::new(&self.script),
        };
        cmd.arg(&self.descriptor).arg(input).arg(output);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Drain a child pipe on its own thread so the child never blocks on a full
/// pipe. Lines are logged at debug and sent back joined once the pipe closes.
fn drain<R: Read + Send + 'static>(pipe: Option<R>, label: &'static str) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut lines = Vec::new();
        if let Some(pipe) = pipe {
            for line in BufReader::new(pipe).lines().map_while(Result::ok) {
                log::debug!("transform {label}: {line}");
                lines.push(line);
            }
        }
        let _ = tx.send(lines.join("\n"));
    });
    rx
}

/// Collected pipe output, or empty if a grandchild still holds the pipe open
/// past `grace`.
fn collect(rx: &Receiver<String>, grace: Duration) -> String {
    rx.recv_timeout(grace).unwrap_or_default()
}

impl TransformBackend for ProcessBackend {
    fn attempt(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), TransformError> {
        // a leftover file must not pass for this attempt's output
        match std::fs::remove_file(output) {
            Ok(()) => log::debug!("removed stale {}", output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut cmd = self.command(input, output);
        log::debug!("running {cmd:?}");
        let mut child = cmd.spawn().map_err(TransformError::Spawn)?;

        // stdout is only logged
        drain(child.stdout.take(), "stdout");
        let stderr = drain(child.stderr.take(), "stderr");

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(TransformError::Timeout(timeout.as_secs()));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        let stderr = collect(&stderr, PIPE_GRACE);

        if !status.success() {
            return Err(TransformError::NonZeroExit {
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        if !output.exists() {
            return Err(TransformError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

/// How one image ended up in the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOutcome {
    /// The transform succeeded on attempt `attempts`.
    Transformed { attempts: u32 },
    /// Every attempt failed; the input was copied instead.
    FallbackCopy,
    /// Attempts and the fallback copy all failed.
    Failed,
}

impl TransformOutcome {
    pub fn is_success(self) -> bool {
        !matches!(self, TransformOutcome::Failed)
    }
}

/// Per-pack transform counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub name: String,
    pub output_dir: PathBuf,
    pub transformed: usize,
    pub fallback: usize,
    pub failed: usize,
}

impl TransformReport {
    pub fn total(&self) -> usize {
        self.transformed + self.fallback + self.failed
    }

    fn record(&mut self, outcome: TransformOutcome) {
        match outcome {
            TransformOutcome::Transformed { .. } => self.transformed += 1,
            TransformOutcome::FallbackCopy => self.fallback += 1,
            TransformOutcome::Failed => self.failed += 1,
        }
    }
}

/// Summary of the workflow descriptor, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorInfo {
    pub path: PathBuf,
    /// Top-level entries when the descriptor is a JSON object, else 0.
    pub node_count: usize,
    pub size_kb: f64,
}

pub struct Transformer<'a, B: TransformBackend = ProcessBackend> {
    backend: B,
    config: &'a TransformConfig,
    codec: MetadataCodec,
    reporter: Reporter<'a>,
}

impl<'a> Transformer<'a, ProcessBackend> {
    pub fn new(config: &'a TransformConfig, codec: MetadataCodec, reporter: Reporter<'a>) -> Self {
        Self::with_backend(ProcessBackend::from_config(config), config, codec, reporter)
    }
}

impl<'a, B: TransformBackend> Transformer<'a, B> {
    pub fn with_backend(
        backend: B,
        config: &'a TransformConfig,
        codec: MetadataCodec,
        reporter: Reporter<'a>,
    ) -> Self {
        Self {
            backend,
            config,
            codec,
            reporter,
        }
    }

    /// Check that the script and descriptor exist and the descriptor parses.
    pub fn validate_setup(&self) -> Result<(), TransformError> {
        if !self.config.script.is_file() {
            return Err(TransformError::ScriptNotFound(self.config.script.clone()));
        }
        self.read_descriptor()?;
        self.reporter.success("Transform setup validated");
        Ok(())
    }

    fn read_descriptor(&self) -> Result<serde_json::Value, TransformError> {
        let path = &self.config.descriptor;
        if !path.is_file() {
            return Err(TransformError::DescriptorNotFound(path.clone()));
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| TransformError::InvalidDescriptor {
            path: path.clone(),
            source,
        })
    }

    pub fn describe_descriptor(&self) -> Result<DescriptorInfo, TransformError> {
        let value = self.read_descriptor()?;
        let size = std::fs::metadata(&self.config.descriptor)?.len();
        Ok(DescriptorInfo {
            path: self.config.descriptor.clone(),
            node_count: value.as_object().map_or(0, |o| o.len()),
            size_kb: size as f64 / 1024.0,
        })
    }

    /// One transform attempt. Logs and returns `false` on any failure.
    pub fn transform(&self, input: &Path, output: &Path, metadata: Option<&MetadataObject>) -> bool {
        let name = display_name(input);
        if let Err(e) = require_input(input) {
            self.reporter.error(&e.to_string());
            return false;
        }
        if let Some(parent) = output.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                self.reporter
                    .error(&format!("Cannot create {}: {e}", parent.display()));
                return false;
            }
        }

        self.reporter.info(&format!("Transforming {name}"));
        if let Err(e) = self.backend.attempt(input, output, self.config.timeout()) {
            self.reporter
                .error(&format!("Transform failed for {name}: {e}"));
            return false;
        }

        self.embed_or_warn(output, metadata);
        self.reporter.info(&format!(
            "Transformed {name} -> {}",
            display_name(output)
        ));
        true
    }

    /// Transform with retries, falling back to a verbatim copy.
    pub fn transform_with_retry(
        &self,
        input: &Path,
        output: &Path,
        metadata: Option<&MetadataObject>,
    ) -> TransformOutcome {
        let name = display_name(input);
        if let Err(e) = require_input(input) {
            self.reporter.error(&e.to_string());
            return TransformOutcome::Failed;
        }

        let attempts = self.config.retries.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.reporter
                    .warn(&format!("Attempt {attempt}/{attempts} for {name}"));
            }
            if self.transform(input, output, metadata) {
                if attempt > 1 {
                    self.reporter
                        .success(&format!("{name} succeeded on attempt {attempt}"));
                }
                return TransformOutcome::Transformed { attempts: attempt };
            }
            self.reporter
                .warn(&format!("Attempt {attempt}/{attempts} failed for {name}"));
        }

        self.reporter.warn(&format!(
            "All attempts failed for {name}, copying original as fallback"
        ));
        if let Err(e) = copy_file(input, output) {
            self.reporter
                .error(&format!("Fallback copy failed for {name}: {e}"));
            return TransformOutcome::Failed;
        }
        self.embed_or_warn(output, metadata);
        self.reporter.success(&format!(
            "Copied original as fallback: {name} -> {}",
            display_name(output)
        ));
        TransformOutcome::FallbackCopy
    }

    /// Transform every original in a pack into `pixiv_safe/`.
    pub fn process_pack(&self, pack: &Path) -> Result<TransformReport, TransformError> {
        if let Err(e) = self.validate_setup() {
            self.reporter.error(&e.to_string());
            return Err(e);
        }

        let name = pack_name(pack);
        let originals = pack.join(ORIGINALS_DIR);
        if !originals.is_dir() {
            let err = TransformError::MissingOriginals(pack.to_path_buf());
            self.reporter.error(&err.to_string());
            return Err(err);
        }
        let output_dir = pack.join(PIXIV_SAFE_DIR);
        std::fs::create_dir_all(&output_dir)?;

        let metadata = self.load_metadata(pack);
        let mut report = TransformReport {
            name: name.clone(),
            output_dir: output_dir.clone(),
            ..Default::default()
        };

        let images = list_images(&originals)?;
        if images.is_empty() {
            self.reporter
                .warn(&format!("No images found in {}", originals.display()));
            return Ok(report);
        }

        let total = images.len();
        self.reporter
            .status(&format!("Transforming {total} images from {name}"));
        for (i, source) in images.iter().enumerate() {
            let file = display_name(source);
            let image_metadata = metadata.get(&file).filter(|m| !m.is_empty());
            let outcome =
                self.transform_with_retry(source, &output_dir.join(&file), image_metadata);
            report.record(outcome);

            self.reporter.fraction(i + 1, total);
            self.reporter.status(&format!(
                "Transforming {}/{total} - {} ok, {} failed",
                i + 1,
                report.transformed + report.fallback,
                report.failed
            ));
        }

        self.reporter.reset();
        let ok = report.transformed + report.fallback;
        if report.failed == 0 {
            self.reporter
                .success(&format!("Pack {name} transformed: {ok} images"));
        } else {
            self.reporter.warn(&format!(
                "Pack {name} transformed with failures: {ok} ok, {} failed",
                report.failed
            ));
        }
        Ok(report)
    }

    fn load_metadata(&self, pack: &Path) -> PackMetadata {
        if !pack.join(METADATA_FILE).is_file() {
            return PackMetadata::new();
        }
        match load_pack_metadata(pack) {
            Ok(m) => {
                self.reporter
                    .info(&format!("Loaded metadata for {} images", m.len()));
                m
            }
            Err(e) => {
                self.reporter
                    .warn(&format!("Could not load {METADATA_FILE}: {e}"));
                PackMetadata::new()
            }
        }
    }

    fn embed_or_warn(&self, output: &Path, metadata: Option<&MetadataObject>) {
        let Some(metadata) = metadata else { return };
        if let Err(e) = self.codec.embed(output, metadata) {
            self.reporter.warn(&format!(
                "Failed to preserve metadata for {}: {e}",
                display_name(output)
            ));
        }
    }
}

fn require_input(input: &Path) -> Result<(), TransformError> {
    if input.is_file() {
        Ok(())
    } else {
        Err(TransformError::InputNotFound(input.to_path_buf()))
    }
}

fn copy_file(input: &Path, output: &Path) -> Result<(), std::io::Error> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(input, output)?;
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Extraction, save_pack_metadata};
    use crate::progress::LogLevel;
    use crate::test_helpers::*;
    use image::DynamicImage;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Scripted backend: pops one result per attempt, writing the output on
    /// success like a real transform would.
    struct MockBackend {
        script: Mutex<Vec<bool>>,
        calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl MockBackend {
        fn new(results: &[bool]) -> Self {
            let mut script = results.to_vec();
            script.reverse();
            Self {
                script: Mutex::new(script),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl TransformBackend for MockBackend {
        fn attempt(&self, input: &Path, output: &Path, _timeout: Duration) -> Result<(), TransformError> {
            self.calls
                .lock()
                .unwrap()
                .push((input.to_path_buf(), output.to_path_buf()));
            let ok = self.script.lock().unwrap().pop().unwrap_or(false);
            if ok {
                // stand-in for the service: invert the image
                let mut img = image::open(input).unwrap();
                img.invert();
                img.save_with_format(output, image::ImageFormat::Png).unwrap();
                Ok(())
            } else {
                Err(TransformError::NonZeroExit {
                    code: Some(1),
                    stderr: "boom".into(),
                })
            }
        }
    }

    struct Setup {
        tmp: TempDir,
        config: TransformConfig,
    }

    fn setup() -> Setup {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("transform.sh");
        let descriptor = tmp.path().join("workflow.json");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::write(&descriptor, r#"{"1": {}, "2": {}, "3": {}}"#).unwrap();
        let config = TransformConfig {
            interpreter: "/bin/sh".into(),
            script,
            descriptor,
            timeout_secs: 5,
            retries: 2,
        };
        Setup { tmp, config }
    }

    fn meta() -> MetadataObject {
        let serde_json::Value::Object(map) = json!({"character": "Miku"}) else {
            unreachable!()
        };
        map
    }

    fn input_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        write_png(&path, &DynamicImage::ImageRgb8(solid_rgb(8, 8, [10, 20, 30])));
        path
    }

    // =========================================================================
    // Setup validation
    // =========================================================================

    #[test]
    fn validate_setup_accepts_valid_files() {
        let s = setup();
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));
        t.validate_setup().unwrap();
        assert!(sink.has_log(LogLevel::Success, "validated"));
    }

    #[test]
    fn validate_setup_rejects_missing_script() {
        let mut s = setup();
        s.config.script = s.tmp.path().join("missing.py");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));
        assert!(matches!(t.validate_setup(), Err(TransformError::ScriptNotFound(_))));
    }

    #[test]
    fn validate_setup_rejects_bad_descriptor() {
        let s = setup();
        std::fs::write(&s.config.descriptor, "{ not json").unwrap();
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));
        assert!(matches!(
            t.validate_setup(),
            Err(TransformError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn describe_descriptor_counts_nodes() {
        let s = setup();
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));
        let info = t.describe_descriptor().unwrap();
        assert_eq!(info.node_count, 3);
        assert_eq!(info.path, s.config.descriptor);
        assert!(info.size_kb > 0.0 && info.size_kb < 1.0);
    }

    // =========================================================================
    // transform / transform_with_retry
    // =========================================================================

    #[test]
    fn transform_success_embeds_metadata() {
        let s = setup();
        let input = input_png(s.tmp.path(), "a.png");
        let output = s.tmp.path().join("out/a.png");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[true]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        assert!(t.transform(&input, &output, Some(&meta())));
        assert_eq!(
            MetadataCodec::default().extract(&output).unwrap(),
            Extraction::Parsed(meta())
        );
    }

    #[test]
    fn transform_failure_returns_false() {
        let s = setup();
        let input = input_png(s.tmp.path(), "a.png");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[false]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        assert!(!t.transform(&input, &s.tmp.path().join("b.png"), None));
        assert!(sink.has_log(LogLevel::Error, "boom"));
    }

    #[test]
    fn retry_succeeds_on_later_attempt_without_fallback() {
        let s = setup();
        let input = input_png(s.tmp.path(), "a.png");
        let output = s.tmp.path().join("out.png");
        let sink = RecordingSink::default();
        let backend = MockBackend::new(&[false, true]);
        let t = Transformer::with_backend(backend, &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let outcome = t.transform_with_retry(&input, &output, None);
        assert_eq!(outcome, TransformOutcome::Transformed { attempts: 2 });
        assert_eq!(t.backend.call_count(), 2);
        assert!(!sink.has_log(LogLevel::Warn, "fallback"));
        assert!(sink.has_log(LogLevel::Success, "attempt 2"));
        // transformed, not copied
        assert_ne!(std::fs::read(&output).unwrap(), std::fs::read(&input).unwrap());
    }

    #[test]
    fn all_attempts_failing_falls_back_to_copy() {
        let s = setup();
        let input = input_png(s.tmp.path(), "a.png");
        let output = s.tmp.path().join("safe/a.png");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[false, false]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let outcome = t.transform_with_retry(&input, &output, Some(&meta()));
        assert_eq!(outcome, TransformOutcome::FallbackCopy);
        assert!(outcome.is_success());
        assert_eq!(t.backend.call_count(), 2);

        let warns = sink.logs_at(LogLevel::Warn);
        let failed_attempts = warns
            .iter()
            .filter(|m| m.starts_with("Attempt") && m.contains("failed for a.png"))
            .count();
        assert_eq!(failed_attempts, 2);
        assert!(warns.iter().any(|m| m.contains("fallback")));

        // same pixels as the input, plus metadata
        let a = image::open(&input).unwrap().to_rgb8();
        let b = image::open(&output).unwrap().to_rgb8();
        assert_eq!(a, b);
        assert_eq!(
            MetadataCodec::default().extract(&output).unwrap(),
            Extraction::Parsed(meta())
        );
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let mut s = setup();
        s.config.retries = 0;
        let input = input_png(s.tmp.path(), "a.png");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[true]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let outcome = t.transform_with_retry(&input, &s.tmp.path().join("o.png"), None);
        assert_eq!(outcome, TransformOutcome::Transformed { attempts: 1 });
    }

    #[test]
    fn missing_input_is_failed() {
        let s = setup();
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let outcome = t.transform_with_retry(&s.tmp.path().join("nope.png"), &s.tmp.path().join("o.png"), None);
        assert_eq!(outcome, TransformOutcome::Failed);
        assert_eq!(t.backend.call_count(), 0);
        assert!(sink.has_log(LogLevel::Error, "Input not found"));
        assert!(sink.has_log(LogLevel::Error, "nope.png"));
    }

    #[test]
    fn require_input_names_missing_path() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("gone.png");
        match require_input(&missing) {
            Err(TransformError::InputNotFound(p)) => assert_eq!(p, missing),
            other => panic!("unexpected {other:?}"),
        }
        assert!(require_input(tmp.path()).is_err());
    }

    // =========================================================================
    // process_pack
    // =========================================================================

    #[test]
    fn process_pack_routes_originals_to_pixiv_safe() {
        let s = setup();
        let pack = make_pack(s.tmp.path(), "PackA");
        let originals = pack.join(ORIGINALS_DIR);
        std::fs::create_dir(&originals).unwrap();
        input_png(&originals, "a.png");
        input_png(&originals, "b.png");
        let mut pack_meta = PackMetadata::new();
        pack_meta.insert("a.png".into(), meta());
        save_pack_metadata(&pack, &pack_meta).unwrap();

        let sink = RecordingSink::default();
        // a.png: fails twice → fallback; b.png: succeeds first time
        let backend = MockBackend::new(&[false, false, true]);
        let t = Transformer::with_backend(backend, &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let report = t.process_pack(&pack).unwrap();
        assert_eq!(report.fallback, 1);
        assert_eq!(report.transformed, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total(), 2);
        assert_eq!(file_names(&pack.join(PIXIV_SAFE_DIR)), vec!["a.png", "b.png"]);

        assert_eq!(sink.progress_values(), vec![50, 100, 0]);
        assert!(sink.has_log(LogLevel::Success, "Pack PackA transformed"));
        assert!(sink.statuses().iter().any(|s| s.contains("2/2")));
        assert_eq!(
            MetadataCodec::default()
                .extract(&pack.join(PIXIV_SAFE_DIR).join("a.png"))
                .unwrap(),
            Extraction::Parsed(meta())
        );
    }

    #[test]
    fn process_pack_requires_original_images() {
        let s = setup();
        let pack = make_pack(s.tmp.path(), "PackA");
        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        assert!(matches!(
            t.process_pack(&pack),
            Err(TransformError::MissingOriginals(_))
        ));
        assert!(!pack.join(PIXIV_SAFE_DIR).exists());
    }

    #[test]
    fn process_pack_tolerates_unreadable_metadata() {
        let s = setup();
        let pack = make_pack(s.tmp.path(), "PackA");
        let originals = pack.join(ORIGINALS_DIR);
        std::fs::create_dir(&originals).unwrap();
        input_png(&originals, "a.png");
        std::fs::write(pack.join(METADATA_FILE), "nope").unwrap();

        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[true]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let report = t.process_pack(&pack).unwrap();
        assert_eq!(report.transformed, 1);
        assert!(sink.has_log(LogLevel::Warn, "metadata.json"));
    }

    #[test]
    fn process_pack_with_no_images_is_empty_report() {
        let s = setup();
        let pack = make_pack(s.tmp.path(), "PackA");
        std::fs::create_dir(pack.join(ORIGINALS_DIR)).unwrap();

        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        let report = t.process_pack(&pack).unwrap();
        assert_eq!(report.total(), 0);
        assert!(sink.has_log(LogLevel::Warn, "No images"));
    }

    #[test]
    fn process_pack_fails_on_invalid_setup() {
        let mut s = setup();
        s.config.descriptor = s.tmp.path().join("missing.json");
        let pack = make_pack(s.tmp.path(), "PackA");
        std::fs::create_dir(pack.join(ORIGINALS_DIR)).unwrap();

        let sink = RecordingSink::default();
        let t = Transformer::with_backend(MockBackend::new(&[]), &s.config, MetadataCodec::default(), Reporter::new(&sink));

        assert!(matches!(
            t.process_pack(&pack),
            Err(TransformError::DescriptorNotFound(_))
        ));
        assert_eq!(sink.logs_at(LogLevel::Error).len(), 1);
    }

    // =========================================================================
    // ProcessBackend (real subprocess)
    // =========================================================================

    #[cfg(unix)]
    mod process {
        use super::*;

        fn backend(tmp: &Path, body: &str) -> ProcessBackend {
            let script = tmp.join("t.sh");
            std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
            let descriptor = tmp.join("w.json");
            std::fs::write(&descriptor, "{}").unwrap();
            ProcessBackend::from_config(&TransformConfig {
                interpreter: "/bin/sh".into(),
                script,
                descriptor,
                timeout_secs: 1,
                retries: 1,
            })
        }

        #[test]
        fn copies_via_script_arguments() {
            let tmp = TempDir::new().unwrap();
            // $1 descriptor, $2 input, $3 output
            let b = backend(tmp.path(), r#"cp "$2" "$3""#);
            let input = tmp.path().join("in.bin");
            let output = tmp.path().join("out.bin");
            std::fs::write(&input, b"payload").unwrap();

            b.attempt(&input, &output, Duration::from_secs(5)).unwrap();
            assert_eq!(std::fs::read(&output).unwrap(), b"payload");
        }

        #[test]
        fn non_zero_exit_is_error_with_stderr() {
            let tmp = TempDir::new().unwrap();
            let b = backend(tmp.path(), "echo nope >&2; exit 3");
            let err = b
                .attempt(&tmp.path().join("a"), &tmp.path().join("b"), Duration::from_secs(5))
                .unwrap_err();
            match err {
                TransformError::NonZeroExit { code, stderr } => {
                    assert_eq!(code, Some(3));
                    assert_eq!(stderr, "nope");
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[test]
        fn zero_exit_without_output_is_error() {
            let tmp = TempDir::new().unwrap();
            let b = backend(tmp.path(), "exit 0");
            let err = b
                .attempt(&tmp.path().join("a"), &tmp.path().join("b"), Duration::from_secs(5))
                .unwrap_err();
            assert!(matches!(err, TransformError::MissingOutput(_)));
        }

        #[test]
        fn stale_output_does_not_count_as_success() {
            let tmp = TempDir::new().unwrap();
            let b = backend(tmp.path(), "exit 0");
            let output = tmp.path().join("b");
            std::fs::write(&output, b"from an earlier run").unwrap();

            let err = b
                .attempt(&tmp.path().join("a"), &output, Duration::from_secs(5))
                .unwrap_err();
            assert!(matches!(err, TransformError::MissingOutput(_)));
            assert!(!output.exists());
        }

        #[test]
        fn background_child_holding_pipes_does_not_stall() {
            let tmp = TempDir::new().unwrap();
            let b = backend(tmp.path(), r#"sleep 5 & cp "$2" "$3"; exit 0"#);
            let input = tmp.path().join("in.bin");
            let output = tmp.path().join("out.bin");
            std::fs::write(&input, b"payload").unwrap();

            let start = Instant::now();
            b.attempt(&input, &output, Duration::from_secs(4)).unwrap();
            assert!(start.elapsed() < Duration::from_secs(4));
            assert_eq!(std::fs::read(&output).unwrap(), b"payload");
        }

        #[test]
        fn overdue_child_is_killed() {
            let tmp = TempDir::new().unwrap();
            let b = backend(tmp.path(), "exec sleep 10");
            let start = Instant::now();
            let err = b
                .attempt(&tmp.path().join("a"), &tmp.path().join("b"), Duration::from_millis(300))
                .unwrap_err();
            assert!(matches!(err, TransformError::Timeout(_)));
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        #[test]
        fn missing_interpreter_is_spawn_error() {
            let tmp = TempDir::new().unwrap();
            let mut b = backend(tmp.path(), "exit 0");
            b.interpreter = Some("/definitely/not/here".into());
            let err = b
                .attempt(&tmp.path().join("a"), &tmp.path().join("b"), Duration::from_secs(1))
                .unwrap_err();
            assert!(matches!(err, TransformError::Spawn(_)));
        }
    }
}
