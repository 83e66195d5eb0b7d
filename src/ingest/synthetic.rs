//! Synthetic frame source.
//!
//! `stub://` URLs produce generated frames so the pipeline can run without
//! any capture hardware or image files. Frames carry a moving gradient so
//! consecutive frames differ.

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceSettings, SourceStats};
use crate::frame::Frame;

pub struct SyntheticSource {
    settings: SourceSettings,
    frame_count: u64,
    /// Simulated scene state; bumps every 50 frames.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!(
                "synthetic frame size must be non-zero, got {}x{}",
                settings.width,
                settings.height
            ));
        }
        log::info!(
            "SyntheticSource: connected to {} ({}x{})",
            settings.url,
            settings.width,
            settings.height
        );
        Ok(Self {
            settings,
            frame_count: 0,
            scene_state: 0,
        })
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.settings.width as usize) * (self.settings.height as usize) * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self
            .settings
            .limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        let mut frame = Frame::from_rgb(
            pixels,
            self.settings.width,
            self.settings.height,
            self.frame_count,
        )?;
        if self.settings.mirror {
            frame.mirror();
        }
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        self.settings.url.clone()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            origin: self.settings.url.clone(),
        }
    }
}
