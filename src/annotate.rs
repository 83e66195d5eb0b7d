//! Frame annotation.
//!
//! Draws a rectangle and a `category: confidence` label per qualifying
//! detection onto a copy of the frame. Colors, border width and font size
//! come from `AnnotationStyle`; the font itself is optional (without one the
//! label strip is drawn but no glyphs are rendered).

use std::collections::HashMap;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Result};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;
use crate::frame::Frame;

const LABEL_PADDING: u32 = 4;
const BANNER_PADDING: u32 = 5;

pub const DEFAULT_FONT_SIZE: f32 = 16.0;
/// Largest font size the annotator draws with; larger values are clamped.
pub const MAX_FONT_SIZE: f32 = 512.0;
/// Thickest box border the annotator draws; wider values are clamped.
pub const MAX_BORDER_WIDTH: u32 = 64;

/// Drawing parameters. Colors are RGB.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationStyle {
    pub box_color: [u8; 3],
    pub text_color: [u8; 3],
    pub border_width: u32,
    pub font_size: f32,
    /// Per-category box colors; categories not listed use `box_color`.
    pub category_colors: HashMap<String, [u8; 3]>,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            box_color: [255, 0, 0],
            text_color: [255, 255, 255],
            border_width: 2,
            font_size: DEFAULT_FONT_SIZE,
            category_colors: HashMap::new(),
        }
    }
}

impl AnnotationStyle {
    /// rock blue, paper green, scissors red.
    pub fn gestures() -> Self {
        let mut style = Self::default();
        style.category_colors.insert("rock".into(), [0, 0, 255]);
        style.category_colors.insert("paper".into(), [0, 255, 0]);
        style.category_colors.insert("scissors".into(), [255, 0, 0]);
        style
    }

    /// Font size within `[1, MAX_FONT_SIZE]`; non-finite sizes fall back to the default.
    pub fn effective_font_size(&self) -> f32 {
        if self.font_size.is_finite() {
            self.font_size.clamp(1.0, MAX_FONT_SIZE)
        } else {
            DEFAULT_FONT_SIZE
        }
    }

    pub fn effective_border_width(&self) -> u32 {
        self.border_width.clamp(1, MAX_BORDER_WIDTH)
    }

    pub fn color_for(&self, category: &str) -> [u8; 3] {
        self.category_colors
            .get(category)
            .copied()
            .unwrap_or(self.box_color)
    }
}

/// One box to draw.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub category: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Annotation {
    pub fn new(category: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            category: category.into(),
            confidence,
            bbox,
        }
    }

    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.category, self.confidence)
    }
}

pub struct Annotator {
    style: AnnotationStyle,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(style: AnnotationStyle) -> Self {
        Self { style, font: None }
    }

    /// Load a TTF/OTF font used for label text.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .map_err(|e| anyhow!("failed to read font {}: {}", path.display(), e))?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| anyhow!("invalid font {}: {}", path.display(), e))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Return a copy of `frame` with every annotation drawn on it.
    pub fn annotate(&self, frame: &Frame, annotations: &[Annotation]) -> Frame {
        let mut out = frame.clone();
        for annotation in annotations {
            self.draw_annotation(&mut out, annotation);
        }
        out
    }

    fn draw_annotation(&self, frame: &mut Frame, annotation: &Annotation) {
        let Some((left, top, width, height)) =
            annotation.bbox.clamp_to(frame.width(), frame.height())
        else {
            log::debug!(
                "skipping degenerate box for {} at {:?}",
                annotation.category,
                annotation.bbox
            );
            return;
        };
        let color = Rgb(self.style.color_for(&annotation.category));
        let image = frame.image_mut();
        for i in 0..self.style.effective_border_width() {
            let rect = Rect::at(left.saturating_sub(i as i32), top.saturating_sub(i as i32))
                .of_size(width.saturating_add(2 * i), height.saturating_add(2 * i));
            draw_hollow_rect_mut(image, rect, color);
        }

        let label = annotation.label();
        let (text_w, text_h) = self.measure(&label);
        let strip_w = text_w
            .saturating_add(LABEL_PADDING)
            .min(frame.width().max(1));
        let strip_h = text_h.saturating_add(LABEL_PADDING * 2);
        // Above the box when there is room, otherwise just inside its top edge.
        let strip_top = if top >= strip_h as i32 {
            top - strip_h as i32
        } else {
            top
        };
        let strip_left = left.min(frame.width().saturating_sub(strip_w) as i32);
        let image = frame.image_mut();
        draw_filled_rect_mut(
            image,
            Rect::at(strip_left, strip_top).of_size(strip_w, strip_h),
            color,
        );
        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                Rgb(self.style.text_color),
                strip_left + (LABEL_PADDING / 2) as i32,
                strip_top + LABEL_PADDING as i32,
                PxScale::from(self.style.effective_font_size()),
                font,
                &label,
            );
        }
    }

    /// Draw `text` on a black block with its top-left corner at `position`.
    pub fn draw_banner(
        &self,
        frame: &mut Frame,
        text: &str,
        position: (i32, i32),
        color: [u8; 3],
    ) {
        if text.is_empty() || frame.width() == 0 || frame.height() == 0 {
            return;
        }
        let (text_w, text_h) = self.measure(text);
        let (x, y) = position;
        let block = Rect::at(x - BANNER_PADDING as i32, y - BANNER_PADDING as i32)
            .of_size(
                text_w.saturating_add(BANNER_PADDING * 2),
                text_h.saturating_add(BANNER_PADDING * 2),
            );
        let image = frame.image_mut();
        draw_filled_rect_mut(image, block, Rgb([0, 0, 0]));
        if let Some(font) = &self.font {
            draw_text_mut(
                image,
                Rgb(color),
                x,
                y,
                PxScale::from(self.style.effective_font_size()),
                font,
                text,
            );
        }
    }

    /// Rendered size of `text`; estimated from the font size without a font.
    fn measure(&self, text: &str) -> (u32, u32) {
        let size = self.style.effective_font_size();
        match &self.font {
            Some(font) => {
                let (w, h) = text_size(PxScale::from(size), font, text);
                (w.max(1), h.max(1))
            }
            None => {
                let glyph_w = (size * 0.5).ceil() as u32;
                let chars = u32::try_from(text.chars().count().max(1)).unwrap_or(u32::MAX);
                (glyph_w.saturating_mul(chars), size.ceil() as u32)
            }
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(AnnotationStyle::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::filled(200, 120, [10, 10, 10], 1)
    }

    #[test]
    fn empty_annotation_list_is_a_pure_copy() {
        let original = frame();
        let annotated = Annotator::default().annotate(&original, &[]);
        assert!(annotated.same_pixels(&original));
        assert_eq!(annotated.index, original.index);
    }

    #[test]
    fn annotate_draws_box_without_touching_input() {
        let original = frame();
        let annotation = Annotation::new("crash", 0.8, BoundingBox::new(50.0, 60.0, 150.0, 110.0));
        let annotated = Annotator::default().annotate(&original, &[annotation]);

        assert!(!annotated.same_pixels(&original));
        assert!(original.pixels().iter().all(|&p| p == 10));
        // Left edge of the box is red.
        assert_eq!(annotated.image().get_pixel(50, 90).0, [255, 0, 0]);
        // Box interior stays untouched.
        assert_eq!(annotated.image().get_pixel(100, 90).0, [10, 10, 10]);
        // Label strip sits right above the box.
        assert_eq!(annotated.image().get_pixel(52, 58).0, [255, 0, 0]);
    }

    #[test]
    fn category_colors_override_default() {
        let annotator = Annotator::new(AnnotationStyle::gestures());
        let annotation = Annotation::new("paper", 0.9, BoundingBox::new(20.0, 40.0, 80.0, 100.0));
        let annotated = annotator.annotate(&frame(), &[annotation]);
        assert_eq!(annotated.image().get_pixel(20, 70).0, [0, 255, 0]);
    }

    #[test]
    fn out_of_frame_and_degenerate_boxes_are_skipped() {
        let original = frame();
        let annotations = vec![
            Annotation::new("fire", 0.9, BoundingBox::new(500.0, 500.0, 600.0, 600.0)),
            Annotation::new("fire", 0.9, BoundingBox::new(30.0, 30.0, 30.0, 80.0)),
        ];
        let annotated = Annotator::default().annotate(&original, &annotations);
        assert!(annotated.same_pixels(&original));
    }

    #[test]
    fn box_touching_top_edge_keeps_label_inside_frame() {
        let annotation = Annotation::new("medical", 0.7, BoundingBox::new(0.0, 0.0, 60.0, 60.0));
        let annotated = Annotator::default().annotate(&frame(), &[annotation]);
        assert_eq!(annotated.image().get_pixel(5, 5).0, [255, 0, 0]);
    }

    #[test]
    fn label_uses_two_decimals() {
        let annotation = Annotation::new("crash", 0.876, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(annotation.label(), "crash: 0.88");
    }

    #[test]
    fn banner_paints_black_block() {
        let annotator = Annotator::default();
        let mut f = Frame::filled(200, 120, [200, 200, 200], 1);
        annotator.draw_banner(&mut f, "3", (100, 50), [255, 255, 0]);
        assert_eq!(f.image().get_pixel(100, 50).0, [0, 0, 0]);
    }

    #[test]
    fn oversized_style_values_are_clamped_when_drawing() {
        let style = AnnotationStyle {
            font_size: 1.0e10,
            border_width: u32::MAX,
            ..AnnotationStyle::default()
        };
        assert_eq!(style.effective_font_size(), MAX_FONT_SIZE);
        assert_eq!(style.effective_border_width(), MAX_BORDER_WIDTH);

        let annotator = Annotator::new(style);
        let annotation = Annotation::new("crash", 0.8, BoundingBox::new(50.0, 60.0, 150.0, 110.0));
        let annotated = annotator.annotate(&frame(), &[annotation]);
        assert!(!annotated.same_pixels(&frame()));

        let mut f = frame();
        annotator.draw_banner(&mut f, &"x".repeat(10_000), (10, 10), [255, 255, 0]);
        assert_eq!(f.image().get_pixel(10, 10).0, [0, 0, 0]);
    }

    #[test]
    fn non_finite_font_size_falls_back_to_default() {
        for font_size in [f32::NAN, f32::INFINITY, -3.0] {
            let style = AnnotationStyle {
                font_size,
                ..AnnotationStyle::default()
            };
            let expected = if font_size.is_finite() { 1.0 } else { DEFAULT_FONT_SIZE };
            assert_eq!(style.effective_font_size(), expected);
        }
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let err = Annotator::default()
            .with_font_file(Path::new("/definitely/not/here.ttf"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to read font"));
    }
}
