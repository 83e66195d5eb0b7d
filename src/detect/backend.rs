use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps a pretrained model. It receives a frame, blocks until
/// inference finishes, and returns every raw detection it produced. Policy
/// decisions (which labels matter, which scores are high enough) belong to
/// `CategoryPolicy`, not to the backend.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Class names the model can emit, in model index order.
    fn class_names(&self) -> &[String];

    /// Run inference on a frame.
    ///
    /// Implementations must treat the frame as read-only.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
