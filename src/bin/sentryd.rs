//! sentryd - watch a frame source for emergency categories
//!
//! This daemon:
//! 1. Reads frames from the configured source (`stub://`, image directory)
//! 2. Runs the configured detector backend on each frame
//! 3. Keeps detections whose label maps to a category above the threshold
//! 4. Draws them onto the frame and records a snapshot plus a log row
//!
//! Ctrl-C stops the loop after the current frame.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use frame_sentry::config::{BackendKind, SentryConfig, CONFIG_ENV};
use frame_sentry::ui::Ui;
use frame_sentry::{open_source, BoundingBox, Pipeline, Recorder, StopFlag, StubBackend};

#[derive(Parser, Debug)]
#[command(
    name = "sentryd",
    version,
    about = "Detect and record emergency situations in camera frames"
)]
struct Args {
    /// Config file (JSON, or TOML by extension)
    #[arg(long, env = CONFIG_ENV, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: `stub://name` or a directory of images
    #[arg(long)]
    source: Option<String>,

    /// ONNX detector model (selects the tract backend)
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Class names file, one per line
    #[arg(long, value_name = "PATH")]
    names: Option<PathBuf>,

    /// Category confidence threshold
    #[arg(long)]
    conf: Option<f32>,

    /// Directory for snapshots and the detection log
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Font used for box labels
    #[arg(long, value_name = "PATH")]
    font: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Flip frames horizontally
    #[arg(long)]
    mirror: bool,

    /// Annotate and log only; write no snapshots or log rows
    #[arg(long)]
    no_record: bool,

    /// Stub backend: report `LABEL:CONF` on every frame (repeatable)
    #[arg(long = "stub-detect", value_name = "LABEL:CONF")]
    stub_detect: Vec<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = SentryConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args);
        cfg.validate()?;
        cfg
    };

    let policy = cfg.build_policy()?;
    let annotator = cfg.build_annotator()?;
    let recorder = match cfg.recorder_config() {
        Some(recorder_cfg) => Some(Recorder::open(recorder_cfg)?),
        None => None,
    };

    let stub = stub_backend(&args.stub_detect, cfg.source.width, cfg.source.height)?;
    let backends = {
        let _stage = ui.stage("Load detector");
        cfg.build_backends(stub)?
    };
    let mut pipeline = Pipeline::new(Box::new(backends), policy, annotator, recorder)
        .with_max_frames(args.max_frames);
    {
        let _stage = ui.stage("Warm up detector");
        pipeline.warm_up()?;
    }

    let mut source = open_source(&cfg.source)?;

    let stop = StopFlag::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("sentryd running. source={}", source.describe());
    log::info!(
        "categories: {}, threshold={:.2}",
        pipeline
            .policy()
            .rules()
            .iter()
            .map(|rule| rule.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        pipeline.policy().threshold()
    );
    match pipeline.recorder() {
        Some(recorder) => log::info!(
            "recording to {} (log {})",
            recorder.output_dir().display(),
            recorder.log_path().display()
        ),
        None => log::info!("recording disabled"),
    }

    let mut sink = ui.progress_sink();
    let stats = pipeline.run(&mut source, &mut sink, &stop)?;

    log::info!(
        "done: frames={} qualifying={} recorded={} record_failures={} inference_failures={}",
        stats.frames,
        stats.qualifying,
        stats.recorded,
        stats.record_failures,
        stats.inference_failures
    );
    if let Some(recorder) = pipeline.recorder() {
        for record in recorder.latest(5)? {
            log::info!(
                "recent: {} {} {:.3} {}",
                record.timestamp(),
                record.category(),
                record.confidence(),
                record.image_path().display()
            );
        }
    }
    Ok(())
}

fn apply_args(cfg: &mut SentryConfig, args: &Args) {
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if args.mirror {
        cfg.source.mirror = true;
    }
    if let Some(model) = &args.model {
        cfg.model.path = Some(model.clone());
        cfg.model.backend = BackendKind::Tract;
    }
    if let Some(names) = &args.names {
        cfg.model.names_path = Some(names.clone());
    }
    if let Some(conf) = args.conf {
        cfg.policy.threshold = conf;
    }
    if let Some(output) = &args.output {
        cfg.recorder.output_dir = output.clone();
    }
    if let Some(font) = &args.font {
        cfg.annotate.font_path = Some(font.clone());
    }
    if args.no_record {
        cfg.recorder.enabled = false;
    }
}

/// Stub backend reporting each `LABEL:CONF` as a box over the frame centre.
fn stub_backend(entries: &[String], width: u32, height: u32) -> Result<StubBackend> {
    let (w, h) = (width as f32, height as f32);
    let bbox = BoundingBox::new(w * 0.25, h * 0.25, w * 0.75, h * 0.75);
    StubBackend::from_entries(entries, bbox).context("invalid --stub-detect value")
}
