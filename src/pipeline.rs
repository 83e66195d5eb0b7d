//! Detection-to-action pipeline.
//!
//! Per frame: `CAPTURE -> INFER -> FILTER -> (ANNOTATE, RECORD*) -> DISPLAY`.
//!
//! - INFER failures skip the frame (nothing annotated, nothing recorded).
//! - RECORD failures are per detection; siblings in the same frame still run.
//! - Source failures end the run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::annotate::{Annotation, Annotator};
use crate::detect::{BoundingBox, Detection, DetectorBackend};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::policy::CategoryPolicy;
use crate::record::Recorder;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame source failed: {0:#}")]
    Source(anyhow::Error),
    #[error("inference failed on frame {frame}: {error:#}")]
    Inference { frame: u64, error: anyhow::Error },
    #[error("recording {category} failed: {error:#}")]
    Record {
        category: String,
        error: anyhow::Error,
    },
    #[error("display sink failed: {0:#}")]
    Sink(anyhow::Error),
}

/// A detection that passed the policy.
#[derive(Clone, Debug, PartialEq)]
pub struct QualifiedDetection {
    pub category: String,
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Set when the recorder persisted it.
    pub image_path: Option<PathBuf>,
}

/// A detection whose recording failed.
#[derive(Debug)]
pub struct RecordFailure {
    pub category: String,
    pub class_label: String,
    pub error: PipelineError,
}

/// Outcome of one frame.
#[derive(Debug)]
pub struct FrameReport {
    pub frame_index: u64,
    pub annotated: Frame,
    pub detections: Vec<QualifiedDetection>,
    pub failures: Vec<RecordFailure>,
}

impl FrameReport {
    pub fn recorded(&self) -> usize {
        self.detections
            .iter()
            .filter(|d| d.image_path.is_some())
            .count()
    }
}

/// What the display stage wants next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Stop,
}

/// DISPLAY stage. Receives every processed frame.
pub trait FrameSink {
    fn present(&mut self, report: &FrameReport) -> anyhow::Result<SinkControl>;
}

/// Sink that only logs qualifying detections.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn present(&mut self, report: &FrameReport) -> anyhow::Result<SinkControl> {
        for detection in &report.detections {
            log::info!(
                "frame {}: detected {} (class={}, confidence={:.3})",
                report.frame_index,
                detection.category.to_uppercase(),
                detection.class_label,
                detection.confidence
            );
        }
        Ok(SinkControl::Continue)
    }
}

/// Cloneable stop request, e.g. set from a Ctrl-C handler.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames: u64,
    pub inference_failures: u64,
    pub qualifying: u64,
    pub recorded: u64,
    pub record_failures: u64,
}

pub struct Pipeline {
    backend: Box<dyn DetectorBackend>,
    policy: CategoryPolicy,
    annotator: Annotator,
    recorder: Option<Recorder>,
    max_frames: Option<u64>,
}

impl Pipeline {
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        policy: CategoryPolicy,
        annotator: Annotator,
        recorder: Option<Recorder>,
    ) -> Self {
        Self {
            backend,
            policy,
            annotator,
            recorder,
            max_frames: None,
        }
    }

    /// Stop the loop after `limit` frames.
    pub fn with_max_frames(mut self, limit: Option<u64>) -> Self {
        self.max_frames = limit;
        self
    }

    pub fn policy(&self) -> &CategoryPolicy {
        &self.policy
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn recorder(&self) -> Option<&Recorder> {
        self.recorder.as_ref()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.backend.warm_up()
    }

    /// INFER, FILTER, RECORD and ANNOTATE one frame.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameReport, PipelineError> {
        let started = Instant::now();
        let raw = self
            .backend
            .infer(frame)
            .map_err(|error| PipelineError::Inference {
                frame: frame.index,
                error,
            })?;
        let inferred = started.elapsed();

        let mut detections = Vec::new();
        let mut failures = Vec::new();
        let mut annotations = Vec::new();
        for detection in &raw {
            let Some(category) = self
                .policy
                .classify(&detection.class_label, detection.confidence)
            else {
                continue;
            };
            let image_path = match self.record_one(frame, category, detection) {
                Ok(path) => path,
                Err(error) => {
                    log::warn!("frame {}: {}", frame.index, error);
                    failures.push(RecordFailure {
                        category: category.to_string(),
                        class_label: detection.class_label.clone(),
                        error,
                    });
                    None
                }
            };
            annotations.push(Annotation::new(category, detection.confidence, detection.bbox));
            detections.push(QualifiedDetection {
                category: category.to_string(),
                class_label: detection.class_label.clone(),
                confidence: detection.confidence,
                bbox: detection.bbox,
                image_path,
            });
        }

        let annotated = self.annotator.annotate(frame, &annotations);
        log::debug!(
            "frame {}: {} raw, {} qualifying, infer {:?}, total {:?}",
            frame.index,
            raw.len(),
            detections.len(),
            inferred,
            started.elapsed()
        );
        Ok(FrameReport {
            frame_index: frame.index,
            annotated,
            detections,
            failures,
        })
    }

    fn record_one(
        &self,
        frame: &Frame,
        category: &str,
        detection: &Detection,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let Some(recorder) = &self.recorder else {
            return Ok(None);
        };
        let details = format!("class={}", detection.class_label);
        recorder
            .record(frame, category, detection.confidence, &details)
            .map(Some)
            .map_err(|error| PipelineError::Record {
                category: category.to_string(),
                error,
            })
    }

    /// Drive the frame loop until the source ends, the sink or `stop` asks
    /// to stop, or the frame limit is reached.
    pub fn run<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        stop: &StopFlag,
    ) -> Result<RunStats, PipelineError>
    where
        S: FrameSource + ?Sized,
        K: FrameSink + ?Sized,
    {
        let mut stats = RunStats::default();
        loop {
            if stop.is_stopped() {
                log::info!("stop requested after {} frames", stats.frames);
                break;
            }
            if self.max_frames.is_some_and(|limit| stats.frames >= limit) {
                log::info!("frame limit {} reached", stats.frames);
                break;
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("end of stream from {}", source.describe());
                    break;
                }
                Err(e) => {
                    log::error!("could not read frame from {}: {:#}", source.describe(), e);
                    return Err(PipelineError::Source(e));
                }
            };
            stats.frames += 1;

            let report = match self.process_frame(&frame) {
                Ok(report) => report,
                Err(e) => {
                    stats.inference_failures += 1;
                    log::warn!("{}", e);
                    continue;
                }
            };
            stats.qualifying += report.detections.len() as u64;
            stats.recorded += report.recorded() as u64;
            stats.record_failures += report.failures.len() as u64;

            match sink.present(&report).map_err(PipelineError::Sink)? {
                SinkControl::Continue => {}
                SinkControl::Stop => {
                    log::info!("display requested stop");
                    break;
                }
            }
        }
        Ok(stats)
    }
}
