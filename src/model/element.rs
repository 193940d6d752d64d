use serde::{Deserialize, Serialize};

use crate::model::geometry::BBox;

/// Per-kind payload. Shared fields live on `SemanticElement`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ElementKind {
    Button { text: Option<String> },
    Input { hint: Option<String> },
    Label { text: String },
    Unknown { text: Option<String> },
}

impl ElementKind {
    pub fn name(&self) -> &'static str {
        match self {
            ElementKind::Button { .. } => "button",
            ElementKind::Input { .. } => "input",
            ElementKind::Label { .. } => "label",
            ElementKind::Unknown { .. } => "unknown",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ElementKind::Button { text } | ElementKind::Unknown { text } => text.as_deref(),
            ElementKind::Input { hint } => hint.as_deref(),
            ElementKind::Label { text } => Some(text.as_str()),
        }
    }

    /// Buttons and inputs are the only things a label can be paired with.
    pub fn is_control(&self) -> bool {
        matches!(self, ElementKind::Button { .. } | ElementKind::Input { .. })
    }

    pub fn is_label(&self) -> bool {
        matches!(self, ElementKind::Label { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Structural,
    Visual,
    Fused,
}

/// Coarse appearance of an element's pixels at build time: an 8x8 average
/// hash for the pattern plus the mean luma for the overall brightness. The
/// hash of a flat region is all zeros, so only the mean tells two flat
/// regions apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisualSignature {
    pub hash: u64,
    pub mean_luma: u8,
}

impl VisualSignature {
    pub fn new(hash: u64, mean_luma: u8) -> Self {
        VisualSignature { hash, mean_luma }
    }

    /// Hamming distance between the pattern hashes.
    pub fn distance(&self, other: &VisualSignature) -> u32 {
        (self.hash ^ other.hash).count_ones()
    }

    pub fn luma_delta(&self, other: &VisualSignature) -> u8 {
        self.mean_luma.abs_diff(other.mean_luma)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticElement {
    pub id: String,
    #[serde(flatten)]
    pub kind: ElementKind,
    /// Always window-relative.
    pub bbox: BBox,
    pub confidence: f32,
    pub provenance: Provenance,
    /// Id of the label or control this element was paired with (not owned).
    #[serde(default)]
    pub paired_with: Option<String>,
    #[serde(default)]
    pub signature: Option<VisualSignature>,
}

impl SemanticElement {
    pub fn text(&self) -> Option<&str> {
        self.kind.text()
    }
}
