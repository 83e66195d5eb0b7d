//! Frame container.
//!
//! - `Frame`: owned RGB8 pixels plus the source's sequence number.
//!
//! Frames are produced by a `FrameSource` and flow through the pipeline by
//! reference. Anything that needs a modified frame (the annotator, the game
//! overlay) works on a clone, so the captured pixels stay untouched for the
//! recorder.

use anyhow::{anyhow, Result};
use image::{imageops, RgbImage};

/// Default synthetic frame width.
pub const DEFAULT_FRAME_WIDTH: u32 = 640;

/// Default synthetic frame height.
pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,

    /// Sequence number assigned by the source (starts at 1).
    pub index: u64,
}

impl Frame {
    pub fn new(image: RgbImage, index: u64) -> Self {
        Self { image, index }
    }

    /// Build a frame from packed RGB bytes (`width * height * 3`).
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("invalid frame buffer for {}x{}", width, height))?;
        Ok(Self::new(image, index))
    }

    /// Solid-color frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Self {
        Self::new(RgbImage::from_pixel(width, height, image::Rgb(rgb)), index)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Packed RGB bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Horizontal flip in place (mirror view).
    pub fn mirror(&mut self) {
        imageops::flip_horizontal_in_place(&mut self.image);
    }

    /// Same pixels, same dimensions. The index is ignored.
    pub fn same_pixels(&self, other: &Frame) -> bool {
        self.image.dimensions() == other.image.dimensions()
            && self.image.as_raw() == other.image.as_raw()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_rejects_wrong_length() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 4, 1).unwrap_err();
        assert!(err.to_string().contains("expected 48 RGB bytes"));
    }

    #[test]
    fn from_rgb_accepts_packed_pixels() {
        let frame = Frame::from_rgb(vec![7u8; 4 * 2 * 3], 4, 2, 3).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.index, 3);
        assert!(frame.pixels().iter().all(|&p| p == 7));
    }

    #[test]
    fn clone_is_independent() {
        let original = Frame::filled(8, 8, [10, 20, 30], 1);
        let mut copy = original.clone();
        copy.image_mut().put_pixel(0, 0, image::Rgb([255, 255, 255]));
        assert!(!original.same_pixels(&copy));
        assert_eq!(original.image().get_pixel(0, 0).0, [10, 20, 30]);
    }

    #[test]
    fn mirror_flips_columns() {
        let mut frame = Frame::filled(3, 1, [0, 0, 0], 1);
        frame.image_mut().put_pixel(0, 0, image::Rgb([9, 9, 9]));
        frame.mirror();
        assert_eq!(frame.image().get_pixel(2, 0).0, [9, 9, 9]);
        assert_eq!(frame.image().get_pixel(0, 0).0, [0, 0, 0]);
    }
}
