//! Collaborators backed by external helper programs, one process per call.

use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;
use tracing::warn;
use uuid::Uuid;

use crate::{
    backend::{
        protocol::HelperRequest,
        traits::{Backend, RecognitionEngine, TemplateSpec},
    },
    error::CallError,
    isolation::watchdog::{HelperCommand, Watchdog},
    model::{
        geometry::{Point, WindowHandle, WindowMeta},
        signals::{Frame, RawStructuralElement, VisualDetection},
    },
};

/// Temporary PNG exchanged with a helper; removed on drop.
struct ScratchImage {
    path: PathBuf,
}

impl ScratchImage {
    fn new(dir: &Path) -> Self {
        ScratchImage {
            path: dir.join(format!("ui-map-{}.png", Uuid::new_v4())),
        }
    }

    fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for ScratchImage {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), "could not remove scratch image: {}", e);
            }
        }
    }
}

pub struct HelperBackend {
    watchdog: Watchdog,
    command: HelperCommand,
    scratch_dir: PathBuf,
}

impl HelperBackend {
    pub fn new(watchdog: Watchdog, command: HelperCommand) -> Self {
        HelperBackend {
            watchdog,
            command,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }
}

impl Backend for HelperBackend {
    fn window_meta(
        &self,
        window: &WindowHandle,
        timeout: Duration,
    ) -> Result<WindowMeta, CallError> {
        self.watchdog.run_isolated(
            "window_meta",
            &self.command,
            &HelperRequest::window_meta(window.as_str()),
            timeout,
        )
    }

    fn enumerate_elements(
        &self,
        window: &WindowHandle,
        timeout: Duration,
    ) -> Result<Vec<RawStructuralElement>, CallError> {
        self.watchdog.run_isolated(
            "enumerate",
            &self.command,
            &HelperRequest::enumerate(window.as_str()),
            timeout,
        )
    }

    fn capture_image(
        &self,
        window: &WindowHandle,
        timeout: Duration,
    ) -> Result<RgbImage, CallError> {
        let scratch = ScratchImage::new(&self.scratch_dir);
        self.watchdog.run_isolated::<_, ()>(
            "capture",
            &self.command,
            &HelperRequest::capture(window.as_str(), &scratch.path_str()),
            timeout,
        )?;

        image::open(&scratch.path)
            .map(|img| img.to_rgb8())
            .map_err(|e| CallError::Crash {
                call: "capture".into(),
                reason: format!("helper wrote an unreadable image: {}", e),
            })
    }

    fn click(&self, at: Point, timeout: Duration) -> Result<(), CallError> {
        self.watchdog.run_isolated(
            "click",
            &self.command,
            &HelperRequest::click(at.x, at.y),
            timeout,
        )
    }

    fn type_text(&self, text: &str, timeout: Duration) -> Result<(), CallError> {
        self.watchdog.run_isolated(
            "type_text",
            &self.command,
            &HelperRequest::type_text(text),
            timeout,
        )
    }
}

/// OCR / matching engine living in a helper program. Construction is cheap;
/// the helper loads its models per call.
pub struct HelperRecognizer {
    watchdog: Watchdog,
    command: HelperCommand,
    scratch_dir: PathBuf,
}

impl HelperRecognizer {
    pub fn new(watchdog: Watchdog, command: HelperCommand) -> Self {
        HelperRecognizer {
            watchdog,
            command,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn write_frame(&self, frame: &Frame, call: &str) -> Result<ScratchImage, CallError> {
        let scratch = ScratchImage::new(&self.scratch_dir);
        frame.image.save(&scratch.path).map_err(|e| CallError::Crash {
            call: call.to_string(),
            reason: format!("could not hand frame to helper: {}", e),
        })?;
        Ok(scratch)
    }
}

impl RecognitionEngine for HelperRecognizer {
    fn detect_text(
        &self,
        frame: &Frame,
        timeout: Duration,
    ) -> Result<Vec<VisualDetection>, CallError> {
        let scratch = self.write_frame(frame, "detect_text")?;
        self.watchdog.run_isolated(
            "detect_text",
            &self.command,
            &HelperRequest::detect_text(&scratch.path_str()),
            timeout,
        )
    }

    fn match_templates(
        &self,
        frame: &Frame,
        templates: &[TemplateSpec],
        timeout: Duration,
    ) -> Result<Vec<VisualDetection>, CallError> {
        if templates.is_empty() {
            return Ok(vec![]);
        }
        let scratch = self.write_frame(frame, "match_templates")?;
        self.watchdog.run_isolated(
            "match_templates",
            &self.command,
            &HelperRequest::match_templates(&scratch.path_str(), templates),
            timeout,
        )
    }
}
