#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::detect::COCO_CLASS_NAMES;
use crate::frame::Frame;

/// Letterbox padding value (YOLO convention).
const PAD_VALUE: u8 = 114;

/// Upper bound on candidates entering NMS.
const MAX_NMS_INPUTS: usize = 3000;

/// Tuning knobs for `TractBackend`.
#[derive(Clone, Debug)]
pub struct TractOptions {
    /// Square model input size in pixels.
    pub input_size: u32,
    /// Model-level score floor; the category policy applies its own threshold later.
    pub score_threshold: f32,
    pub iou_threshold: f32,
    /// Class names in model index order. Defaults to COCO.
    pub class_names: Vec<String>,
}

impl Default for TractOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            score_threshold: 0.25,
            iou_threshold: 0.45,
            class_names: COCO_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Loads a local model file once and runs CPU inference per frame. Output
/// is expected as `[1, 4 + C, N]` or `[1, N, 4 + C]` with `cx, cy, w, h`
/// boxes followed by per-class scores.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    options: TractOptions,
}

#[derive(Clone, Copy, Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, options: TractOptions) -> Result<Self> {
        let model_path = model_path.as_ref();
        if options.input_size == 0 {
            return Err(anyhow!("model input size must be > 0"));
        }
        if options.class_names.is_empty() {
            return Err(anyhow!("model class name list is empty"));
        }
        let size = options.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "tract backend loaded {} ({} classes, input {}px)",
            model_path.display(),
            options.class_names.len(),
            options.input_size
        );

        Ok(Self { model, options })
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let size = self.options.input_size;
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
        let resized = imageops::resize(frame.image(), new_w, new_h, FilterType::Triangle);

        let pad_x = (size - new_w) / 2;
        let pad_y = (size - new_h) / 2;
        let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);

        let side = size as usize;
        let raw = canvas.as_raw();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            raw[(y * side + x) * 3 + c] as f32 / 255.0
        });

        Ok((
            input.into_tensor(),
            Letterbox {
                scale,
                pad_x: pad_x as f32,
                pad_y: pad_y as f32,
            },
        ))
    }

    fn decode(
        &self,
        output: &Tensor,
        letterbox: Letterbox,
        frame: &Frame,
    ) -> Result<Vec<Detection>> {
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not three-dimensional")?;
        let features = 4 + self.options.class_names.len();
        let (anchors, transposed) = if shape[1] == features {
            (shape[2], true)
        } else if shape[2] == features {
            (shape[1], false)
        } else {
            return Err(anyhow!(
                "model output {:?} does not match {} classes",
                shape,
                self.options.class_names.len()
            ));
        };
        let at = |anchor: usize, feature: usize| -> f32 {
            if transposed {
                view[[0, feature, anchor]]
            } else {
                view[[0, anchor, feature]]
            }
        };

        let mut candidates: Vec<(usize, Detection)> = Vec::new();
        for anchor in 0..anchors {
            let (class_idx, score) = (4..features)
                .map(|f| (f - 4, at(anchor, f)))
                .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.options.score_threshold {
                continue;
            }
            let (cx, cy, w, h) = (at(anchor, 0), at(anchor, 1), at(anchor, 2), at(anchor, 3));
            if !(cx.is_finite() && cy.is_finite() && w > 0.0 && h > 0.0) {
                continue;
            }
            let unmap = |v: f32, pad: f32, limit: u32| {
                ((v - pad) / letterbox.scale).clamp(0.0, limit as f32)
            };
            let bbox = BoundingBox::new(
                unmap(cx - w / 2.0, letterbox.pad_x, frame.width()),
                unmap(cy - h / 2.0, letterbox.pad_y, frame.height()),
                unmap(cx + w / 2.0, letterbox.pad_x, frame.width()),
                unmap(cy + h / 2.0, letterbox.pad_y, frame.height()),
            );
            if bbox.area() <= 0.0 {
                continue;
            }
            let label = self.options.class_names[class_idx].clone();
            candidates.push((class_idx, Detection::new(label, score.min(1.0), bbox)));
        }

        Ok(non_max_suppression(candidates, self.options.iou_threshold))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn class_names(&self) -> &[String] {
        &self.options.class_names
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, letterbox, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.options.input_size;
        let blank = Frame::filled(side, side, [PAD_VALUE; 3], 0);
        self.infer(&blank).map(|_| ())
    }
}

/// Class-wise greedy NMS, highest score first.
pub(crate) fn non_max_suppression(
    mut candidates: Vec<(usize, Detection)>,
    iou_threshold: f32,
) -> Vec<Detection> {
    candidates.sort_unstable_by(|a, b| b.1.confidence.total_cmp(&a.1.confidence));
    if candidates.len() > MAX_NMS_INPUTS {
        log::warn!(
            "NMS input truncated from {} to {}",
            candidates.len(),
            MAX_NMS_INPUTS
        );
        candidates.truncate(MAX_NMS_INPUTS);
    }
    let mut kept: Vec<(usize, Detection)> = Vec::new();
    for (class_idx, detection) in candidates {
        let suppressed = kept.iter().any(|(kept_class, kept_det)| {
            *kept_class == class_idx && kept_det.bbox.iou(&detection.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push((class_idx, detection));
        }
    }
    kept.into_iter().map(|(_, detection)| detection).collect()
}
