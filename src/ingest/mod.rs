//! Frame ingestion sources.
//!
//! This module provides different sources for frames:
//! - Synthetic frames (`stub://name`, testing and dry runs)
//! - Image directories (one frame per image file, lexical order)
//!
//! Live device capture is not handled here; anything that can dump frames
//! into a directory can feed the pipeline.
//!
//! All sources produce `Frame` instances with a monotonically increasing
//! index starting at 1, and signal end of stream with `Ok(None)`.

pub mod dir;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use dir::ImageDirSource;
pub use synthetic::SyntheticSource;

/// Anything that yields frames.
pub trait FrameSource {
    /// Next frame, `Ok(None)` at end of stream.
    ///
    /// An error means the source is unusable; callers stop the run.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human readable origin (URL or path).
    fn describe(&self) -> String;

    /// Frames handed out so far.
    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub origin: String,
}

/// Source selection settings.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    /// `stub://name` or a directory path.
    pub url: String,
    /// Stop after this many frames.
    pub limit: Option<u64>,
    /// Synthetic frame size.
    pub width: u32,
    pub height: u32,
    /// Flip frames horizontally.
    pub mirror: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            limit: None,
            width: crate::frame::DEFAULT_FRAME_WIDTH,
            height: crate::frame::DEFAULT_FRAME_HEIGHT,
            mirror: false,
        }
    }
}

/// Open the source named by `settings.url`.
pub fn open_source(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
    let url = settings.url.trim();
    if url.is_empty() {
        return Err(anyhow!("frame source must not be empty"));
    }
    if url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(settings.clone())?));
    }
    if url.contains("://") {
        return Err(anyhow!(
            "unsupported frame source '{}': only stub:// and local image directories are supported",
            url
        ));
    }
    if url.chars().all(|c| c.is_ascii_digit()) {
        return Err(anyhow!(
            "camera device '{}' is not supported; capture frames into a directory instead",
            url
        ));
    }
    Ok(Box::new(ImageDirSource::open(url, settings.limit, settings.mirror)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> SourceSettings {
        SourceSettings {
            url: url.to_string(),
            ..SourceSettings::default()
        }
    }

    #[test]
    fn stub_url_opens_synthetic_source() {
        let source = open_source(&settings("stub://front")).unwrap();
        assert_eq!(source.describe(), "stub://front");
    }

    #[test]
    fn device_index_is_rejected() {
        let err = open_source(&settings("0")).err().unwrap();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn network_url_is_rejected() {
        assert!(open_source(&settings("rtsp://camera/stream")).is_err());
        assert!(open_source(&settings("  ")).is_err());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(open_source(&settings("/no/such/frames/dir")).is_err());
    }
}
