//! Ephemeral inputs to the map builder. Nothing in here is persisted.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::model::geometry::{BBox, Point, WindowMeta};

/// One node of the platform accessibility tree, absolute coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStructuralElement {
    pub role: String,
    pub bbox: BBox,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    Ocr,
    Template,
    Contour,
}

/// A hit from text recognition or image matching, absolute coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualDetection {
    pub bbox: BBox,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    pub confidence: f32,
    pub source: DetectionSource,
}

impl VisualDetection {
    /// Text used for naming: recognized text, else the template id.
    pub fn name(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or(self.template_id.as_deref())
    }
}

/// Pixels of one window. Pixel (0, 0) is the window origin, so
/// window-relative boxes index the image directly.
#[derive(Debug, Clone)]
pub struct Frame {
    pub origin: Point,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(origin: Point, image: RgbImage) -> Self {
        Frame { origin, image }
    }

    pub fn width(&self) -> i32 {
        self.image.width() as i32
    }

    pub fn height(&self) -> i32 {
        self.image.height() as i32
    }

    /// Clip a window-relative box to the frame; `None` if nothing is left.
    pub fn clip(&self, rel: &BBox) -> Option<BBox> {
        let x0 = rel.x.max(0);
        let y0 = rel.y.max(0);
        let x1 = rel.right().min(self.width());
        let y1 = rel.bottom().min(self.height());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(BBox::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn luma(&self, x: i32, y: i32) -> u8 {
        let p = self.image.get_pixel(x as u32, y as u32).0;
        ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8
    }
}

/// Result of one coordinated capture: window metadata, pixels and tree
/// all observed at the same instant.
#[derive(Debug, Clone)]
pub struct Capture {
    pub meta: WindowMeta,
    pub frame: Frame,
    pub elements: Vec<RawStructuralElement>,
}
