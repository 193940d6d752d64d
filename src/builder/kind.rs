use crate::model::{
    element::ElementKind,
    geometry::BBox,
    signals::{DetectionSource, VisualDetection},
};

/// Map a platform role tag (UIA, AT-SPI, AX) onto an element kind.
///
/// Returns `None` for roles that say nothing useful, so the caller can fall
/// back to visual evidence.
pub fn kind_from_role(role: &str, text: Option<String>) -> Option<ElementKind> {
    let role: String = role
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    match role.as_str() {
        "button" | "pushbutton" | "togglebutton" | "splitbutton" | "menuitem" | "link"
        | "hyperlink" | "checkbox" | "radiobutton" | "tab" | "tabitem" => {
            Some(ElementKind::Button { text })
        }

        "edit" | "entry" | "textbox" | "textfield" | "passwordtext" | "passwordedit"
        | "searchbox" | "combobox" | "spinbutton" => Some(ElementKind::Input { hint: text }),

        "label" | "statictext" | "text" | "heading" => match text {
            Some(text) => Some(ElementKind::Label { text }),
            None => None,
        },

        _ => None,
    }
}

/// Tunables for shape-based inference of visual-only elements.
#[derive(Debug, Clone, Copy)]
pub struct ShapeRules {
    /// Boxes at least this much wider than tall read as text inputs.
    pub input_aspect: f64,
    /// Max edge gap for text to count as adjacent to a box.
    pub adjacency_px: i32,
    /// Upper bound on the side of a checkbox-like square.
    pub small_box_px: i32,
}

/// Kind of a detection that has no structural counterpart.
///
/// `inner_text` is OCR text found inside the detection's box, `adjacent_text`
/// tells whether any other text sits right next to it.
pub fn infer_visual_kind(
    detection: &VisualDetection,
    inner_text: Option<String>,
    adjacent_text: bool,
    rules: &ShapeRules,
) -> ElementKind {
    match detection.source {
        DetectionSource::Template => ElementKind::Button {
            text: inner_text.or_else(|| detection.text.clone()),
        },

        DetectionSource::Ocr => match detection.text.clone() {
            Some(text) => ElementKind::Label { text },
            None => ElementKind::Unknown { text: None },
        },

        DetectionSource::Contour => {
            if inner_text.is_some() {
                return ElementKind::Button { text: inner_text };
            }
            if detection.bbox.aspect_ratio() >= rules.input_aspect {
                return ElementKind::Input { hint: None };
            }
            if adjacent_text && is_small_square(&detection.bbox, rules.small_box_px) {
                return ElementKind::Button { text: None };
            }
            ElementKind::Unknown { text: None }
        }
    }
}

fn is_small_square(bbox: &BBox, max_side: i32) -> bool {
    let ratio = bbox.aspect_ratio();
    bbox.w <= max_side && bbox.h <= max_side && (0.75..=1.33).contains(&ratio)
}
