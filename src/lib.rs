//! frame-sentry
//!
//! Detection-to-action pipeline for camera frames: a detector reports raw
//! labels, a category policy keeps the ones that matter, and each qualifying
//! detection is drawn onto the frame and persisted as an image plus a CSV
//! log row.
//!
//! # Module Structure
//!
//! - `frame`: owned RGB frames
//! - `ingest`: frame sources (synthetic `stub://`, image directories)
//! - `detect`: detector backends (scripted stub, tract ONNX) and registry
//! - `policy`: label to category mapping with a confidence floor
//! - `annotate`: boxes, labels and banners
//! - `record`: JPEG snapshots and the append-only detection log
//! - `pipeline`: the per-frame loop tying the above together
//! - `game`: rock-paper-scissors on top of the same pipeline
//! - `config`, `ui`: binary plumbing

pub mod annotate;
pub mod config;
pub mod detect;
pub mod frame;
pub mod game;
pub mod ingest;
pub mod pipeline;
pub mod policy;
pub mod record;
pub mod ui;

pub use annotate::{Annotation, AnnotationStyle, Annotator};
pub use config::SentryConfig;
pub use detect::{BackendRegistry, BoundingBox, Detection, DetectorBackend, StubBackend};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SourceSettings};
pub use pipeline::{
    FrameReport, FrameSink, LogSink, Pipeline, PipelineError, QualifiedDetection, RunStats,
    SinkControl, StopFlag,
};
pub use policy::{CategoryPolicy, CategoryRule};
pub use record::{DetectionRecord, Recorder, RecorderConfig};
