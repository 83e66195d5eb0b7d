//! rps - rock-paper-scissors against the computer
//!
//! Runs the detection pipeline with the gesture policy and plays a number of
//! rounds on its output. Each round counts down, watches for a gesture, and
//! compares the best one seen against the computer's move.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::io::IsTerminal;
use std::path::PathBuf;

use frame_sentry::config::{BackendKind, SentryConfig, CONFIG_ENV};
use frame_sentry::game::{Game, GameSink, Outcome};
use frame_sentry::ui::Ui;
use frame_sentry::{open_source, BoundingBox, Pipeline, Recorder, StopFlag, StubBackend};

/// Gesture threshold used when none is given; hand-gesture models score low.
const DEFAULT_GAME_THRESHOLD: f32 = 0.1;

#[derive(Parser, Debug)]
#[command(name = "rps", version, about = "Play rock-paper-scissors with hand gestures")]
struct Args {
    /// Config file (JSON, or TOML by extension)
    #[arg(long, env = CONFIG_ENV, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Frame source: `stub://name` or a directory of images
    #[arg(long)]
    source: Option<String>,

    /// ONNX gesture model (selects the tract backend)
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Class names file, one per line
    #[arg(long, value_name = "PATH")]
    names: Option<PathBuf>,

    /// Gesture confidence threshold
    #[arg(long, default_value_t = DEFAULT_GAME_THRESHOLD)]
    conf: f32,

    /// Rounds to play
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Nominal frame rate used to time rounds
    #[arg(long, default_value_t = 15.0)]
    fps: f64,

    /// Seed for the computer's moves
    #[arg(long)]
    seed: Option<u64>,

    /// Record detected gestures like sentryd does
    #[arg(long)]
    record: bool,

    /// Directory for snapshots and the detection log (with --record)
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Save the last overlay frame here when the game ends
    #[arg(long, value_name = "PATH")]
    final_frame: Option<PathBuf>,

    /// Font used for labels and banners
    #[arg(long, value_name = "PATH")]
    font: Option<PathBuf>,

    /// Do not mirror frames
    #[arg(long)]
    no_mirror: bool,

    /// Stub backend: report `LABEL:CONF` on every frame (repeatable)
    #[arg(long = "stub-gesture", value_name = "LABEL:CONF")]
    stub_gesture: Vec<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.rounds == 0 {
        return Err(anyhow!("rounds must be >= 1"));
    }
    let ui = Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());

    let cfg = {
        let _stage = ui.stage("Load configuration");
        let mut cfg = SentryConfig::load_from(args.config.as_deref())?;
        apply_args(&mut cfg, &args);
        cfg.validate()?;
        cfg
    };

    let recorder = match cfg.recorder_config() {
        Some(recorder_cfg) => Some(Recorder::open(recorder_cfg)?),
        None => None,
    };
    let stub = stub_backend(&args.stub_gesture, cfg.source.width, cfg.source.height)?;
    let backends = {
        let _stage = ui.stage("Load gesture model");
        cfg.build_backends(stub)?
    };
    let mut pipeline = Pipeline::new(
        Box::new(backends),
        cfg.build_policy()?,
        cfg.build_annotator()?,
        recorder,
    );
    pipeline.warm_up()?;

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let game = Game::new(rng);
    let mut sink = GameSink::new(game, cfg.build_annotator()?, args.fps, args.rounds)?;
    let mut source = open_source(&cfg.source)?;

    let stop = StopFlag::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || handler_stop.stop())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "rps: {} rounds on {} (threshold {:.2})",
        args.rounds,
        source.describe(),
        pipeline.policy().threshold()
    );
    let stats = pipeline.run(&mut source, &mut sink, &stop)?;

    let results = sink.results();
    let wins = results
        .iter()
        .filter(|r| r.outcome() == Some(Outcome::PlayerWins))
        .count();
    log::info!(
        "played {} of {} rounds over {} frames, you won {}",
        results.len(),
        args.rounds,
        stats.frames,
        wins
    );
    for (n, result) in results.iter().enumerate() {
        println!(
            "round {}: computer played {}. {}",
            n + 1,
            result.computer,
            result.message()
        );
    }

    if let (Some(path), Some(frame)) = (&args.final_frame, sink.last_frame()) {
        frame
            .image()
            .save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        log::info!("final frame written to {}", path.display());
    }
    Ok(())
}

fn apply_args(cfg: &mut SentryConfig, args: &Args) {
    cfg.apply_gesture_preset();
    cfg.policy.threshold = args.conf;
    cfg.source.mirror = !args.no_mirror;
    cfg.recorder.enabled = args.record;
    if let Some(source) = &args.source {
        cfg.source.url = source.clone();
    }
    if let Some(model) = &args.model {
        cfg.model.path = Some(model.clone());
        cfg.model.backend = BackendKind::Tract;
    }
    if let Some(names) = &args.names {
        cfg.model.names_path = Some(names.clone());
    }
    if let Some(output) = &args.output {
        cfg.recorder.output_dir = output.clone();
    }
    if let Some(font) = &args.font {
        cfg.annotate.font_path = Some(font.clone());
    }
}

/// Stub backend reporting each `LABEL:CONF` on every frame.
fn stub_backend(entries: &[String], width: u32, height: u32) -> Result<StubBackend> {
    let (w, h) = (width as f32, height as f32);
    let bbox = BoundingBox::new(w * 0.3, h * 0.3, w * 0.7, h * 0.7);
    StubBackend::from_entries(entries, bbox).context("invalid --stub-gesture value")
}
