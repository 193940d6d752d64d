//! Fusion of structural and visual evidence into a `UiMap`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    builder::{
        kind::{ShapeRules, infer_visual_kind, kind_from_role},
        normalize::{IdAllocator, clean_label, snake_case_id, text_similarity},
    },
    model::{
        element::{ElementKind, Provenance, SemanticElement},
        fingerprint::WindowFingerprint,
        geometry::{BBox, WindowRect},
        signals::{DetectionSource, RawStructuralElement, VisualDetection},
        ui_map::UiMap,
    },
    resolver::spatial::{BiasPolicy, pair_label_to_control},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Minimum intersection-over-smaller-area for a structural/visual merge.
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,

    /// Minimum normalized text similarity for a merge.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Confidence given to elements reported by the accessibility tree.
    #[serde(default = "default_structural_confidence")]
    pub structural_confidence: f32,

    #[serde(default = "default_input_aspect")]
    pub input_aspect: f64,

    #[serde(default = "default_adjacency_px")]
    pub adjacency_px: i32,

    #[serde(default = "default_small_box_px")]
    pub small_box_px: i32,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: default_overlap_threshold(),
            similarity_threshold: default_similarity_threshold(),
            structural_confidence: default_structural_confidence(),
            input_aspect: default_input_aspect(),
            adjacency_px: default_adjacency_px(),
            small_box_px: default_small_box_px(),
        }
    }
}

fn default_overlap_threshold() -> f64 { 0.5 }
fn default_similarity_threshold() -> f64 { 0.6 }
fn default_structural_confidence() -> f32 { 0.9 }
fn default_input_aspect() -> f64 { 3.0 }
fn default_adjacency_px() -> i32 { 12 }
fn default_small_box_px() -> i32 { 32 }

/// Element before it has an id.
#[derive(Debug)]
struct Draft {
    name: Option<String>,
    kind: ElementKind,
    bbox: BBox,
    confidence: f32,
    provenance: Provenance,
}

/// Stateless; safe to share between threads.
#[derive(Debug, Clone, Default)]
pub struct MapBuilder {
    config: BuilderConfig,
    pairing: BiasPolicy,
}

impl MapBuilder {
    pub fn new(config: BuilderConfig, pairing: BiasPolicy) -> Self {
        MapBuilder { config, pairing }
    }

    /// Build the map for one capture.
    ///
    /// Ids depend only on the inputs and their order: structural elements
    /// claim ids before visual ones, each group in ascending y-then-x order,
    /// and colliding ids get `_2`, `_3`, ... in that order. Empty inputs give
    /// an empty (valid, cacheable) map.
    pub fn build(
        &self,
        fingerprint: &WindowFingerprint,
        window: &WindowRect,
        raw_elements: &[RawStructuralElement],
        detections: &[VisualDetection],
    ) -> UiMap {
        if raw_elements.is_empty() && detections.is_empty() {
            return UiMap::empty(fingerprint.clone());
        }

        let structural = reading_order(
            raw_elements
                .iter()
                .map(|el| RawStructuralElement {
                    bbox: window.to_relative(&el.bbox),
                    ..el.clone()
                })
                .collect(),
            |el| el.bbox,
        );
        let visual = reading_order(
            detections
                .iter()
                .map(|d| VisualDetection {
                    bbox: window.to_relative(&d.bbox),
                    ..d.clone()
                })
                .collect(),
            |d| d.bbox,
        );

        let mut consumed = vec![false; visual.len()];
        let mut drafts = Vec::with_capacity(structural.len() + visual.len());

        for el in &structural {
            let label = el.label.as_deref().and_then(clean_label);
            match self.best_visual_match(el, label.as_deref(), &visual, &consumed) {
                Some(idx) => {
                    consumed[idx] = true;
                    drafts.push(self.fuse(el, label, &visual[idx]));
                }
                None => drafts.push(self.structural_only(el, label)),
            }
        }

        let fused = drafts.len();
        drafts.extend(self.visual_only(&visual, &mut consumed));

        debug!(
            fingerprint = %fingerprint,
            structural = structural.len(),
            visual = visual.len(),
            elements = drafts.len(),
            visual_only = drafts.len() - fused,
            "built semantic map"
        );

        let mut ids = IdAllocator::new();
        let elements = drafts
            .into_iter()
            .map(|d| {
                let base = d
                    .name
                    .as_deref()
                    .and_then(snake_case_id)
                    .unwrap_or_else(|| d.kind.name().to_string());
                SemanticElement {
                    id: ids.claim(&base),
                    kind: d.kind,
                    bbox: d.bbox,
                    confidence: d.confidence,
                    provenance: d.provenance,
                    paired_with: None,
                    signature: None,
                }
            })
            .collect();

        link_pairs(UiMap::new(fingerprint.clone(), elements), &self.pairing)
    }

    fn best_visual_match(
        &self,
        el: &RawStructuralElement,
        label: Option<&str>,
        visual: &[VisualDetection],
        consumed: &[bool],
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (idx, det) in visual.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            let overlap = el.bbox.overlap_ratio(&det.bbox);
            if overlap < self.config.overlap_threshold {
                continue;
            }
            // Unlabeled structural nodes take their name from what is drawn on them.
            if let (Some(label), Some(name)) = (label, det.name()) {
                if text_similarity(label, name) < self.config.similarity_threshold {
                    continue;
                }
            } else if label.is_some() {
                continue;
            }
            if best.is_none_or(|(_, o)| overlap > o) {
                best = Some((idx, overlap));
            }
        }

        best.map(|(idx, _)| idx)
    }

    fn structural_only(&self, el: &RawStructuralElement, label: Option<String>) -> Draft {
        let kind = kind_from_role(&el.role, label.clone())
            .unwrap_or(ElementKind::Unknown { text: label.clone() });
        Draft {
            name: label,
            kind,
            bbox: el.bbox,
            confidence: self.config.structural_confidence,
            provenance: Provenance::Structural,
        }
    }

    fn fuse(&self, el: &RawStructuralElement, label: Option<String>, det: &VisualDetection) -> Draft {
        let text = label.or_else(|| det.name().and_then(clean_label));
        let kind = kind_from_role(&el.role, text.clone()).unwrap_or_else(|| {
            with_text(infer_visual_kind(det, None, false, &self.rules()), text.clone())
        });

        let s = self.config.structural_confidence;
        let v = det.confidence.clamp(0.0, 1.0);
        Draft {
            name: text,
            kind,
            bbox: el.bbox,
            confidence: 1.0 - (1.0 - s) * (1.0 - v),
            provenance: Provenance::Fused,
        }
    }

    fn visual_only(&self, visual: &[VisualDetection], consumed: &mut [bool]) -> Vec<Draft> {
        // Contours first claim the OCR text drawn inside them.
        let mut inner: HashMap<usize, usize> = HashMap::new();
        for (idx, det) in visual.iter().enumerate() {
            if consumed[idx] || det.source != DetectionSource::Contour {
                continue;
            }
            let text_idx = visual.iter().enumerate().position(|(j, t)| {
                !consumed[j]
                    && t.source == DetectionSource::Ocr
                    && t.bbox.area() <= det.bbox.area()
                    && t.bbox.overlap_ratio(&det.bbox) >= self.config.overlap_threshold
            });
            if let Some(j) = text_idx {
                consumed[j] = true;
                inner.insert(idx, j);
            }
        }

        let rules = self.rules();
        let mut drafts = Vec::new();
        for (idx, det) in visual.iter().enumerate() {
            if consumed[idx] {
                continue;
            }

            let text_det = inner.get(&idx).map(|&j| &visual[j]);
            let inner_text = text_det.and_then(|t| t.text.as_deref()).and_then(clean_label);
            let adjacent_text = visual.iter().enumerate().any(|(j, t)| {
                j != idx
                    && Some(j) != inner.get(&idx).copied()
                    && t.source == DetectionSource::Ocr
                    && t.bbox.edge_gap(&det.bbox) <= self.config.adjacency_px
            });

            let kind = infer_visual_kind(det, inner_text.clone(), adjacent_text, &rules);
            let confidence = text_det
                .map(|t| t.confidence.max(det.confidence))
                .unwrap_or(det.confidence);

            drafts.push(Draft {
                name: inner_text.or_else(|| det.name().and_then(clean_label)),
                kind,
                bbox: det.bbox,
                confidence,
                provenance: Provenance::Visual,
            });
        }
        drafts
    }

    fn rules(&self) -> ShapeRules {
        ShapeRules {
            input_aspect: self.config.input_aspect,
            adjacency_px: self.config.adjacency_px,
            small_box_px: self.config.small_box_px,
        }
    }
}

/// Stable sort by top edge, then left edge.
fn reading_order<T>(mut items: Vec<T>, bbox: impl Fn(&T) -> BBox) -> Vec<T> {
    items.sort_by_key(|item| {
        let b = bbox(item);
        (b.y, b.x)
    });
    items
}

fn with_text(kind: ElementKind, text: Option<String>) -> ElementKind {
    match (kind, text) {
        (ElementKind::Label { .. }, Some(text)) => ElementKind::Label { text },
        (ElementKind::Button { .. }, text) => ElementKind::Button { text },
        (ElementKind::Input { .. }, hint) => ElementKind::Input { hint },
        (ElementKind::Unknown { .. }, text) => ElementKind::Unknown { text },
        (kind, None) => kind,
    }
}

/// Record label/control pairings on both sides. A control claimed by several
/// labels points back at the first one in id order.
fn link_pairs(map: UiMap, policy: &BiasPolicy) -> UiMap {
    let pairs: Vec<(String, String)> = map
        .elements()
        .filter(|el| el.kind.is_label())
        .filter_map(|label| {
            pair_label_to_control(&map, &label.id, policy).map(|control| (label.id.clone(), control))
        })
        .collect();

    if pairs.is_empty() {
        return map;
    }

    let mut back_refs: HashMap<String, String> = HashMap::new();
    for (label, control) in &pairs {
        back_refs.entry(control.clone()).or_insert_with(|| label.clone());
    }
    let forward: HashMap<String, String> = pairs.into_iter().collect();

    let (fingerprint, built_at, schema_version, mut elements) = map.into_parts();
    for el in elements.iter_mut() {
        el.paired_with = forward
            .get(&el.id)
            .or_else(|| back_refs.get(&el.id))
            .cloned();
    }
    UiMap::from_parts(fingerprint, built_at, schema_version, elements)
}
