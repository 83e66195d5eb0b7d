//! Image directory frame source.
//!
//! Every `jpg`, `jpeg` or `png` file in a directory becomes one frame, in
//! lexical file-name order. The listing is taken once at open time. A file
//! that fails to decode ends the run with an error.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    limit: Option<u64>,
    mirror: bool,
    frame_count: u64,
}

impl ImageDirSource {
    pub fn open(dir: impl AsRef<Path>, limit: Option<u64>, mirror: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("failed to list {}", dir.display()))?
                .path();
            if path.is_file() && is_image(&path) {
                files.push(path);
            }
        }
        files.sort();
        if files.is_empty() {
            log::warn!("ImageDirSource: no images found in {}", dir.display());
        } else {
            log::info!(
                "ImageDirSource: {} images queued from {}",
                files.len(),
                dir.display()
            );
        }
        Ok(Self {
            dir,
            files,
            next: 0,
            limit,
            mirror,
            frame_count: 0,
        })
    }

    /// Files not yet handed out.
    pub fn remaining(&self) -> usize {
        self.files.len() - self.next
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .map_err(|e| anyhow!("failed to decode frame {}: {}", path.display(), e))?
            .to_rgb8();
        self.frame_count += 1;
        let mut frame = Frame::new(image, self.frame_count);
        if self.mirror {
            frame.mirror();
        }
        log::debug!("ImageDirSource: frame {} from {}", frame.index, path.display());
        Ok(Some(frame))
    }

    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            origin: self.describe(),
        }
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, shade: u8) {
        RgbImage::from_pixel(4, 3, Rgb([shade, shade, shade]))
            .save(dir.join(name))
            .unwrap();
    }

    #[test]
    fn yields_images_in_name_order_then_ends() {
        let tmp = tempfile::tempdir().unwrap();
        write_png(tmp.path(), "b.png", 20);
        write_png(tmp.path(), "a.png", 10);
        std::fs::write(tmp.path().join("notes.txt"), "skip me").unwrap();

        let mut src = ImageDirSource::open(tmp.path(), None, false).unwrap();
        assert_eq!(src.remaining(), 2);
        let first = src.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(first.image().get_pixel(0, 0).0, [10, 10, 10]);
        let second = src.next_frame().unwrap().unwrap();
        assert_eq!(second.image().get_pixel(0, 0).0, [20, 20, 20]);
        assert!(src.next_frame().unwrap().is_none());
        assert_eq!(src.stats().frames_captured, 2);
    }

    #[test]
    fn corrupt_image_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut src = ImageDirSource::open(tmp.path(), None, false).unwrap();
        let err = src.next_frame().unwrap_err();
        assert!(err.to_string().contains("failed to decode frame"));
    }

    #[test]
    fn limit_caps_frames() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..3 {
            write_png(tmp.path(), &format!("{i}.png"), i as u8);
        }
        let mut src = ImageDirSource::open(tmp.path(), Some(1), false).unwrap();
        assert!(src.next_frame().unwrap().is_some());
        assert!(src.next_frame().unwrap().is_none());
    }
}
