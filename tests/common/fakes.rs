use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use image::RgbImage;
use parking_lot::Mutex;
use semantic_ui_map::{
    CallError,
    backend::traits::{Backend, RecognitionEngine, TemplateSpec},
    memory::cache::{StorageConfig, UiMemory},
    model::{
        geometry::{BBox, Point, WindowHandle, WindowMeta, WindowRect},
        signals::{DetectionSource, Frame, RawStructuralElement, VisualDetection},
    },
    orchestrator::context::{RecognizerFactory, UiMapContext},
};

use super::images::{blank, bordered, checker, stripes};

/// Scripted platform backend. Frames are served in order; the last one
/// repeats. Queued failures are returned by `capture_image` first.
pub struct FakeBackend {
    meta: Mutex<WindowMeta>,
    elements: Mutex<Vec<RawStructuralElement>>,
    frames: Mutex<VecDeque<RgbImage>>,
    capture_failures: Mutex<VecDeque<CallError>>,
    action_failure: Mutex<Option<CallError>>,
    clicks: Mutex<Vec<Point>>,
    typed: Mutex<Vec<String>>,
    enumerate_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(meta: WindowMeta, elements: Vec<RawStructuralElement>, frame: RgbImage) -> Self {
        FakeBackend {
            meta: Mutex::new(meta),
            elements: Mutex::new(elements),
            frames: Mutex::new(VecDeque::from([frame])),
            capture_failures: Mutex::new(VecDeque::new()),
            action_failure: Mutex::new(None),
            clicks: Mutex::new(vec![]),
            typed: Mutex::new(vec![]),
            enumerate_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_frames(&self, frames: Vec<RgbImage>) {
        *self.frames.lock() = frames.into();
    }

    pub fn set_elements(&self, elements: Vec<RawStructuralElement>) {
        *self.elements.lock() = elements;
    }

    pub fn set_meta(&self, meta: WindowMeta) {
        *self.meta.lock() = meta;
    }

    pub fn fail_captures(&self, errors: Vec<CallError>) {
        self.capture_failures.lock().extend(errors);
    }

    pub fn fail_actions(&self, err: CallError) {
        *self.action_failure.lock() = Some(err);
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.clicks.lock().clone()
    }

    pub fn typed(&self) -> Vec<String> {
        self.typed.lock().clone()
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.load(Ordering::SeqCst)
    }

    pub fn capture_calls(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }
}

impl Backend for FakeBackend {
    fn window_meta(&self, _window: &WindowHandle, _timeout: Duration) -> Result<WindowMeta, CallError> {
        Ok(self.meta.lock().clone())
    }

    fn enumerate_elements(
        &self,
        _window: &WindowHandle,
        _timeout: Duration,
    ) -> Result<Vec<RawStructuralElement>, CallError> {
        self.enumerate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.elements.lock().clone())
    }

    fn capture_image(&self, _window: &WindowHandle, _timeout: Duration) -> Result<RgbImage, CallError> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.capture_failures.lock().pop_front() {
            return Err(err);
        }
        let mut frames = self.frames.lock();
        let frame = if frames.len() > 1 {
            frames.pop_front()
        } else {
            frames.front().cloned()
        };
        frame.ok_or_else(|| CallError::Crash {
            call: "capture".into(),
            reason: "no frame scripted".into(),
        })
    }

    fn click(&self, at: Point, _timeout: Duration) -> Result<(), CallError> {
        self.clicks.lock().push(at);
        match self.action_failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn type_text(&self, text: &str, _timeout: Duration) -> Result<(), CallError> {
        self.typed.lock().push(text.to_string());
        Ok(())
    }
}

/// Returns fixed detections in frame coordinates.
pub struct FakeRecognizer {
    pub text: Mutex<Vec<VisualDetection>>,
    pub templates: Mutex<Vec<VisualDetection>>,
    pub calls: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new(text: Vec<VisualDetection>) -> Self {
        FakeRecognizer {
            text: Mutex::new(text),
            templates: Mutex::new(vec![]),
            calls: AtomicUsize::new(0),
        }
    }
}

impl RecognitionEngine for FakeRecognizer {
    fn detect_text(&self, _frame: &Frame, _timeout: Duration) -> Result<Vec<VisualDetection>, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.lock().clone())
    }

    fn match_templates(
        &self,
        _frame: &Frame,
        _templates: &[TemplateSpec],
        _timeout: Duration,
    ) -> Result<Vec<VisualDetection>, CallError> {
        Ok(self.templates.lock().clone())
    }
}

pub fn ocr(text: &str, bbox: BBox, confidence: f32) -> VisualDetection {
    VisualDetection {
        bbox,
        text: Some(text.to_string()),
        template_id: None,
        confidence,
        source: DetectionSource::Ocr,
    }
}

pub fn contour(bbox: BBox) -> VisualDetection {
    VisualDetection {
        bbox,
        text: None,
        template_id: None,
        confidence: 0.9,
        source: DetectionSource::Contour,
    }
}

pub fn template(id: &str, bbox: BBox, confidence: f32) -> VisualDetection {
    VisualDetection {
        bbox,
        text: None,
        template_id: Some(id.to_string()),
        confidence,
        source: DetectionSource::Template,
    }
}

pub fn raw(role: &str, bbox: BBox, label: Option<&str>) -> RawStructuralElement {
    RawStructuralElement {
        role: role.to_string(),
        bbox,
        label: label.map(str::to_string),
    }
}

// =========================================================================
// The login window used across orchestrator tests
// =========================================================================

pub const WINDOW_X: i32 = 100;
pub const WINDOW_Y: i32 = 50;
pub const WINDOW_W: i32 = 400;
pub const WINDOW_H: i32 = 300;

pub const USERNAME_LABEL: BBox = BBox { x: 20, y: 40, w: 80, h: 20 };
pub const USERNAME_INPUT: BBox = BBox { x: 120, y: 40, w: 200, h: 20 };
pub const SIGN_IN: BBox = BBox { x: 150, y: 200, w: 100, h: 30 };
pub const FORGOT: BBox = BBox { x: 20, y: 260, w: 120, h: 16 };

pub fn login_meta() -> WindowMeta {
    WindowMeta {
        title: "Login".to_string(),
        rect: WindowRect {
            x: WINDOW_X,
            y: WINDOW_Y,
            w: WINDOW_W,
            h: WINDOW_H,
        },
    }
}

pub fn abs(rel: BBox) -> BBox {
    rel.translate(WINDOW_X, WINDOW_Y)
}

/// Structural tree of the login window; `sign_in_dx` moves the button.
pub fn login_elements(sign_in_dx: i32) -> Vec<RawStructuralElement> {
    vec![
        raw("text", abs(USERNAME_LABEL), Some("Username")),
        raw("edit", abs(USERNAME_INPUT), None),
        raw("button", abs(SIGN_IN.translate(sign_in_dx, 0)), Some("Sign In")),
    ]
}

/// Pixels of the login window; `sign_in_dx` moves the button.
pub fn login_frame(sign_in_dx: i32) -> RgbImage {
    let mut img = blank(WINDOW_W as u32, WINDOW_H as u32);
    stripes(&mut img, USERNAME_LABEL);
    bordered(&mut img, USERNAME_INPUT);
    checker(&mut img, SIGN_IN.translate(sign_in_dx, 0));
    stripes(&mut img, FORGOT);
    img
}

/// OCR output for the login window, frame coordinates.
pub fn login_text() -> Vec<VisualDetection> {
    vec![
        ocr("Sign In", BBox::new(160, 205, 80, 20), 0.95),
        ocr("Forgot password?", FORGOT, 0.9),
        ocr("smudge", BBox::new(300, 280, 30, 10), 0.3),
    ]
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub recognizer: Arc<FakeRecognizer>,
    pub factory_calls: Arc<AtomicUsize>,
}

impl Harness {
    pub fn login() -> Self {
        Harness {
            backend: Arc::new(FakeBackend::new(login_meta(), login_elements(0), login_frame(0))),
            recognizer: Arc::new(FakeRecognizer::new(login_text())),
            factory_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn factory(&self) -> RecognizerFactory {
        let recognizer = self.recognizer.clone();
        let calls = self.factory_calls.clone();
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(recognizer.clone() as Arc<dyn RecognitionEngine>)
        })
    }

    pub fn context(&self) -> UiMapContext {
        let memory = UiMemory::in_memory(&StorageConfig::default()).expect("in-memory store");
        UiMapContext::new(self.backend.clone(), self.factory(), memory)
    }
}

pub fn window() -> WindowHandle {
    WindowHandle::new("Login")
}
