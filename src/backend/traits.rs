use std::time::Duration;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::{
    error::CallError,
    model::{
        geometry::{Point, WindowHandle, WindowMeta, WindowRect},
        signals::{Frame, RawStructuralElement, VisualDetection},
    },
};

/// Platform accessibility/automation adapter.
///
/// Implementations must not block past `timeout`; the helper-process
/// implementation guarantees this through the watchdog.
pub trait Backend: Send + Sync {
    fn window_meta(&self, window: &WindowHandle, timeout: Duration)
    -> Result<WindowMeta, CallError>;

    /// Structural tree, absolute coordinates.
    fn enumerate_elements(
        &self,
        window: &WindowHandle,
        timeout: Duration,
    ) -> Result<Vec<RawStructuralElement>, CallError>;

    /// Pixels of the window only; pixel (0, 0) is the window origin.
    fn capture_image(&self, window: &WindowHandle, timeout: Duration)
    -> Result<RgbImage, CallError>;

    /// Physical click at absolute screen coordinates.
    fn click(&self, at: Point, timeout: Duration) -> Result<(), CallError>;

    /// Type into whatever holds keyboard focus.
    fn type_text(&self, text: &str, timeout: Duration) -> Result<(), CallError>;

    fn get_window_rect(
        &self,
        window: &WindowHandle,
        timeout: Duration,
    ) -> Result<WindowRect, CallError> {
        Ok(self.window_meta(window, timeout)?.rect)
    }
}

/// Image template to look for, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub id: String,
    pub path: String,
}

/// OCR and template/contour matching engine.
///
/// Detections are returned in frame coordinates; the recognition pipeline
/// lifts them to absolute ones.
pub trait RecognitionEngine: Send + Sync {
    fn detect_text(&self, frame: &Frame, timeout: Duration)
    -> Result<Vec<VisualDetection>, CallError>;

    fn match_templates(
        &self,
        frame: &Frame,
        templates: &[TemplateSpec],
        timeout: Duration,
    ) -> Result<Vec<VisualDetection>, CallError>;
}
