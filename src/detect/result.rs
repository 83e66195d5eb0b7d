use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union > f32::EPSILON {
            inter / union
        } else {
            0.0
        }
    }

    /// Integer pixel rectangle clamped to a `width` x `height` frame.
    ///
    /// Returns `(left, top, w, h)`, or `None` when nothing is left after clamping.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(i32, i32, u32, u32)> {
        let finite = [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return None;
        }
        let max_x = width as f32;
        let max_y = height as f32;
        let x1 = self.x1.clamp(0.0, max_x).round() as i64;
        let y1 = self.y1.clamp(0.0, max_y).round() as i64;
        let x2 = self.x2.clamp(0.0, max_x).round() as i64;
        let y2 = self.y2.clamp(0.0, max_y).round() as i64;
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1 as i32, y1 as i32, (x2 - x1) as u32, (y2 - y1) as u32))
    }
}

/// One raw model observation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class name as reported by the model (e.g. "car").
    pub class_label: String,
    /// Score in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_label: class_label.into(),
            confidence,
            bbox,
        }
    }
}
