//! Detection recorder.
//!
//! Persists each qualifying detection as one JPEG plus one row in an
//! append-only CSV log:
//!
//! ```text
//! timestamp,category,confidence,image_path,details
//! 2024-05-01 12:00:00,crash,0.800,detections/crash_20240501_120000.jpg,class=car
//! ```
//!
//! Image names carry the category and a second-level timestamp. A second
//! capture of the same category within the same second gets a `_1`, `_2`...
//! suffix instead of overwriting the first file.
//!
//! The image is written first. When the row cannot be appended the image is
//! removed again (best effort), so the directory and the log stay in step.

use std::borrow::Cow;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Local};
use image::codecs::jpeg::JpegEncoder;

use crate::frame::Frame;

/// Header row written when the log is created.
pub const LOG_HEADER: &str = "timestamp,category,confidence,image_path,details";

pub const DEFAULT_OUTPUT_DIR: &str = "detections";
pub const DEFAULT_LOG_FILE: &str = "emergency_log.csv";
/// Log name used when recording game gestures.
pub const GESTURE_LOG_FILE: &str = "detections.csv";
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const MAX_NAME_ATTEMPTS: u32 = 10_000;
const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

// ----------------------------------------------------------------------------
// Clock
// ----------------------------------------------------------------------------

/// Time source for record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// ----------------------------------------------------------------------------
// DetectionRecord
// ----------------------------------------------------------------------------

/// One persisted detection. Read-only once created.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    timestamp: String,
    category: String,
    confidence: f32,
    image_path: PathBuf,
    details: String,
}

impl DetectionRecord {
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn details(&self) -> &str {
        &self.details
    }

    /// CSV row without the trailing newline.
    pub fn to_row(&self) -> String {
        let image_path = self.image_path.display().to_string();
        let confidence = format!("{:.3}", self.confidence);
        [
            self.timestamp.as_str(),
            self.category.as_str(),
            confidence.as_str(),
            image_path.as_str(),
            self.details.as_str(),
        ]
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn from_fields(fields: Vec<String>) -> Result<Self> {
        // Four-column logs (no details) are accepted as well.
        if !(4..=5).contains(&fields.len()) {
            return Err(anyhow!("expected 5 fields, found {}", fields.len()));
        }
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        let (timestamp, category, confidence, image_path, details) =
            (next(), next(), next(), next(), next());
        let confidence: f32 = confidence
            .trim()
            .parse()
            .map_err(|_| anyhow!("invalid confidence '{}'", confidence))?;
        Ok(Self {
            timestamp,
            category,
            confidence,
            image_path: PathBuf::from(image_path),
            details,
        })
    }
}

// ----------------------------------------------------------------------------
// Recorder
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Directory receiving detection images.
    pub output_dir: PathBuf,
    /// Log file; defaults to `<output_dir>/emergency_log.csv`.
    pub log_path: Option<PathBuf>,
    pub jpeg_quality: u8,
}

impl RecorderConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            log_path: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn resolved_log_path(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(DEFAULT_LOG_FILE))
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

/// Writes detection images and log rows.
///
/// `record` takes `&self`; appends are serialized internally so one recorder
/// can be shared by several producers.
pub struct Recorder {
    output_dir: PathBuf,
    log_path: PathBuf,
    jpeg_quality: u8,
    clock: Box<dyn Clock>,
    write_lock: Mutex<()>,
}

impl Recorder {
    pub fn open(config: RecorderConfig) -> Result<Self> {
        Self::open_with_clock(config, Box::new(SystemClock))
    }

    pub fn open_with_clock(config: RecorderConfig, clock: Box<dyn Clock>) -> Result<Self> {
        if !(1..=100).contains(&config.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be within 1..=100, got {}",
                config.jpeg_quality
            ));
        }
        let log_path = config.resolved_log_path();
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                config.output_dir.display()
            )
        })?;
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let recorder = Self {
            output_dir: config.output_dir,
            log_path,
            jpeg_quality: config.jpeg_quality,
            clock,
            write_lock: Mutex::new(()),
        };
        recorder.ensure_header()?;
        Ok(recorder)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Save `frame` and append one log row. Returns the image path.
    pub fn record(
        &self,
        frame: &Frame,
        category: &str,
        confidence: f32,
        details: &str,
    ) -> Result<PathBuf> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("recorder lock poisoned"))?;

        let now = self.clock.now();
        let (image_path, file) = self.create_image_file(category, &now)?;
        if let Err(e) = self.write_jpeg(file, frame) {
            let _ = fs::remove_file(&image_path);
            return Err(e.context(format!("failed to write {}", image_path.display())));
        }

        let record = DetectionRecord {
            timestamp: now.format(ROW_TIME_FORMAT).to_string(),
            category: category.to_string(),
            confidence,
            image_path: image_path.clone(),
            details: details.to_string(),
        };
        if let Err(e) = self.append_row(&record) {
            if let Err(cleanup) = fs::remove_file(&image_path) {
                log::warn!(
                    "could not remove orphaned image {}: {}",
                    image_path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        log::debug!(
            "recorded {} ({:.3}) -> {}",
            category,
            confidence,
            image_path.display()
        );
        Ok(image_path)
    }

    /// Last `n` log records, oldest first. A missing log yields no records.
    pub fn latest(&self, n: usize) -> Result<Vec<DetectionRecord>> {
        let raw = match fs::read_to_string(&self.log_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow!(
                    "failed to read log {}: {}",
                    self.log_path.display(),
                    e
                ))
            }
        };
        let rows = parse_csv(&raw);
        let mut records = Vec::new();
        for (i, fields) in rows.into_iter().enumerate() {
            if i == 0 && fields.first().map(String::as_str) == Some("timestamp") {
                continue;
            }
            let record = DetectionRecord::from_fields(fields)
                .with_context(|| format!("malformed row {} in {}", i, self.log_path.display()))?;
            records.push(record);
        }
        let skip = records.len().saturating_sub(n);
        Ok(records.split_off(skip))
    }

    fn ensure_header(&self) -> Result<()> {
        let mut file = self.open_log()?;
        self.write_header_if_empty(&mut file)
    }

    fn open_log(&self) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("failed to open log {}", self.log_path.display()))
    }

    fn write_header_if_empty(&self, file: &mut File) -> Result<()> {
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat log {}", self.log_path.display()))?
            .len();
        if len == 0 {
            writeln!(file, "{}", LOG_HEADER)
                .with_context(|| format!("failed to write log {}", self.log_path.display()))?;
        }
        Ok(())
    }

    fn append_row(&self, record: &DetectionRecord) -> Result<()> {
        let mut file = self.open_log()?;
        self.write_header_if_empty(&mut file)?;
        // One write call per row keeps rows whole.
        let line = format!("{}\n", record.to_row());
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to log {}", self.log_path.display()))?;
        Ok(())
    }

    fn create_image_file(
        &self,
        category: &str,
        now: &DateTime<Local>,
    ) -> Result<(PathBuf, File)> {
        let stem = format!("{}_{}", file_safe(category), now.format(FILE_TIME_FORMAT));
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{}.jpg", stem)
            } else {
                format!("{}_{}.jpg", stem, attempt)
            };
            let path = self.output_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(anyhow!("failed to create image {}: {}", path.display(), e));
                }
            }
        }
        Err(anyhow!("no free image name for {}", stem))
    }

    fn write_jpeg(&self, file: File, frame: &Frame) -> Result<()> {
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality)
            .encode_image(frame.image())
            .context("jpeg encoding failed")?;
        writer.flush().context("flush failed")?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// CSV helpers
// ----------------------------------------------------------------------------

fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Split CSV text into records, honouring quoted fields.
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

fn file_safe(category: &str) -> String {
    let cleaned: String = category
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "detection".to_string()
    } else {
        cleaned
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn recorder(dir: &Path) -> Recorder {
        Recorder::open_with_clock(
            RecorderConfig::new(dir.join("detections")),
            Box::new(FixedClock::new(fixed_time())),
        )
        .unwrap()
    }

    fn frame() -> Frame {
        Frame::filled(32, 24, [200, 30, 30], 1)
    }

    #[test]
    fn open_creates_log_with_header() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        let raw = fs::read_to_string(rec.log_path()).unwrap();
        assert_eq!(raw, format!("{}\n", LOG_HEADER));
    }

    #[test]
    fn reopening_does_not_duplicate_header() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        rec.record(&frame(), "crash", 0.8, "class=car").unwrap();
        drop(rec);
        let rec = recorder(tmp.path());
        let raw = fs::read_to_string(rec.log_path()).unwrap();
        assert_eq!(raw.matches("timestamp,").count(), 1);
        assert_eq!(raw.lines().count(), 2);
    }

    #[test]
    fn record_writes_image_and_row() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        let path = rec.record(&frame(), "crash", 0.8, "class=car").unwrap();

        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "crash_20240501_120000.jpg"
        );
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));

        let raw = fs::read_to_string(rec.log_path()).unwrap();
        let row = raw.lines().nth(1).unwrap();
        assert_eq!(
            row,
            format!("2024-05-01 12:00:00,crash,0.800,{},class=car", path.display())
        );
    }

    #[test]
    fn same_second_records_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        let a = rec.record(&frame(), "crash", 0.8, "").unwrap();
        let b = rec.record(&frame(), "crash", 0.9, "").unwrap();
        let c = rec.record(&frame(), "medical", 0.9, "").unwrap();
        assert_ne!(a, b);
        assert!(b.to_str().unwrap().ends_with("crash_20240501_120000_1.jpg"));
        assert!(c.to_str().unwrap().ends_with("medical_20240501_120000.jpg"));
        assert_eq!(rec.latest(10).unwrap().len(), 3);
    }

    #[test]
    fn clock_advance_changes_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let clock = std::sync::Arc::new(FixedClock::new(fixed_time()));
        struct Shared(std::sync::Arc<FixedClock>);
        impl Clock for Shared {
            fn now(&self) -> DateTime<Local> {
                self.0.now()
            }
        }
        let rec = Recorder::open_with_clock(
            RecorderConfig::new(tmp.path()),
            Box::new(Shared(clock.clone())),
        )
        .unwrap();
        rec.record(&frame(), "fire", 0.7, "").unwrap();
        clock.advance(Duration::seconds(1));
        let second = rec.record(&frame(), "fire", 0.7, "").unwrap();
        assert!(second.to_str().unwrap().ends_with("fire_20240501_120001.jpg"));
    }

    #[test]
    fn details_with_commas_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        rec.record(&frame(), "crash", 0.81234, "class=car, lane \"2\"")
            .unwrap();
        let records = rec.latest(1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].details(), "class=car, lane \"2\"");
        assert_eq!(records[0].category(), "crash");
        assert!((records[0].confidence() - 0.812).abs() < 1e-6);
        assert_eq!(records[0].timestamp(), "2024-05-01 12:00:00");
    }

    #[test]
    fn latest_returns_most_recent_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        for (i, category) in ["fire", "crash", "medical"].iter().enumerate() {
            rec.record(&frame(), category, 0.5 + i as f32 / 10.0, "")
                .unwrap();
        }
        let latest = rec.latest(2).unwrap();
        let categories: Vec<&str> = latest.iter().map(|r| r.category()).collect();
        assert_eq!(categories, vec!["crash", "medical"]);
    }

    #[test]
    fn latest_on_missing_log_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        fs::remove_file(rec.log_path()).unwrap();
        assert!(rec.latest(5).unwrap().is_empty());
    }

    #[test]
    fn unsafe_category_characters_are_replaced_in_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        let path = rec.record(&frame(), "../evil", 0.9, "").unwrap();
        assert_eq!(path.parent().unwrap(), rec.output_dir());
        assert!(path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("___evil_"));
    }

    #[test]
    fn recorder_can_be_shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Recorder>();

        let tmp = tempfile::tempdir().unwrap();
        let rec = std::sync::Arc::new(recorder(tmp.path()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rec = rec.clone();
                std::thread::spawn(move || rec.record(&frame(), "fire", 0.9, "").unwrap())
            })
            .collect();
        let mut paths: Vec<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 4);
        assert_eq!(rec.latest(10).unwrap().len(), 4);
    }

    #[test]
    fn record_fails_when_output_dir_is_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::new(tmp.path().join("images"));
        config.log_path = Some(tmp.path().join("log.csv"));
        let rec = Recorder::open_with_clock(config, Box::new(FixedClock::new(fixed_time())))
            .unwrap();
        fs::remove_dir_all(rec.output_dir()).unwrap();

        let err = rec.record(&frame(), "crash", 0.8, "class=car").unwrap_err();
        assert!(err.to_string().contains("failed to create image"));
        assert!(rec.latest(10).unwrap().is_empty());
        let raw = fs::read_to_string(rec.log_path()).unwrap();
        assert_eq!(raw, format!("{}\n", LOG_HEADER));
    }

    #[test]
    fn failed_row_append_removes_the_image() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = recorder(tmp.path());
        fs::remove_file(rec.log_path()).unwrap();
        fs::create_dir(rec.log_path()).unwrap();

        assert!(rec.record(&frame(), "fire", 0.9, "").is_err());
        let leftovers: Vec<_> = fs::read_dir(rec.output_dir())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "jpg"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn rejects_out_of_range_quality() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = RecorderConfig::new(tmp.path());
        config.jpeg_quality = 0;
        assert!(Recorder::open(config).is_err());
    }

    #[test]
    fn csv_parser_handles_quotes_and_newlines() {
        let rows = parse_csv("a,\"b,c\",\"d\"\"e\"\nx,\"multi\nline\",z\n");
        assert_eq!(rows[0], vec!["a", "b,c", "d\"e"]);
        assert_eq!(rows[1], vec!["x", "multi\nline", "z"]);
    }
}
