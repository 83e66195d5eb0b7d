use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

use crate::pipeline::{FrameReport, FrameSink, LogSink, SinkControl};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    /// Spinner (or a plain `==>` line) that reports elapsed time when dropped.
    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Sink that shows a live frame counter on a terminal.
    pub fn progress_sink(&self) -> ProgressSink {
        let bar = if self.pretty() {
            let bar = ProgressBar::new_spinner();
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{spinner} frame {pos} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            bar.set_style(style);
            Some(bar)
        } else {
            None
        };
        ProgressSink {
            bar,
            qualifying: 0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

/// `LogSink` plus a frame counter on a terminal.
pub struct ProgressSink {
    bar: Option<ProgressBar>,
    qualifying: u64,
}

impl ProgressSink {
    pub fn qualifying(&self) -> u64 {
        self.qualifying
    }
}

impl FrameSink for ProgressSink {
    fn present(&mut self, report: &FrameReport) -> anyhow::Result<SinkControl> {
        self.qualifying += report.detections.len() as u64;
        LogSink.present(report)?;
        if let Some(bar) = &self.bar {
            bar.set_position(report.frame_index);
            bar.set_message(format!("{} qualifying", self.qualifying));
        }
        Ok(SinkControl::Continue)
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::frame::Frame;
    use crate::pipeline::QualifiedDetection;

    #[test]
    fn ui_flag_selects_mode() {
        assert_eq!(Ui::from_args(Some("plain"), true).mode, UiMode::Plain);
        assert_eq!(Ui::from_args(Some("pretty"), true).mode, UiMode::Pretty);
        assert_eq!(Ui::from_args(None, true).mode, UiMode::Auto);
        assert!(!Ui::from_args(Some("pretty"), false).pretty());
    }

    #[test]
    fn durations_format_by_magnitude() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }

    #[test]
    fn progress_sink_counts_qualifying_detections() {
        let mut sink = Ui::from_args(Some("plain"), false).progress_sink();
        let report = FrameReport {
            frame_index: 3,
            annotated: Frame::filled(4, 4, [0, 0, 0], 3),
            detections: vec![QualifiedDetection {
                category: "crash".into(),
                class_label: "car".into(),
                confidence: 0.8,
                bbox: BoundingBox::new(0.0, 0.0, 2.0, 2.0),
                image_path: None,
            }],
            failures: Vec::new(),
        };
        assert_eq!(sink.present(&report).unwrap(), SinkControl::Continue);
        assert_eq!(sink.qualifying(), 1);
    }
}
