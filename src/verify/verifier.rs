use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    model::{
        element::{SemanticElement, VisualSignature},
        geometry::BBox,
        signals::Frame,
    },
    verify::signature::{LumaIntegral, edge_density},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Max Euclidean shift (px) between cached and observed position.
    #[serde(default = "default_position_tolerance")]
    pub position_tolerance: f64,

    /// Max Hamming distance (bits) between cached and observed signature.
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance: u32,

    /// Max difference in mean luma (0-255). Flat regions all hash alike, so
    /// brightness is what separates a solid control from the background.
    #[serde(default = "default_luma_tolerance")]
    pub luma_tolerance: u8,

    /// How far (px) around the cached box to look for the element.
    #[serde(default = "default_search_margin")]
    pub search_margin: i32,

    /// Reject controls whose edge density falls outside the band.
    #[serde(default)]
    pub edge_check: bool,

    #[serde(default = "default_edge_min")]
    pub edge_min: f64,

    #[serde(default = "default_edge_max")]
    pub edge_max: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            position_tolerance: default_position_tolerance(),
            signature_tolerance: default_signature_tolerance(),
            luma_tolerance: default_luma_tolerance(),
            search_margin: default_search_margin(),
            edge_check: false,
            edge_min: default_edge_min(),
            edge_max: default_edge_max(),
        }
    }
}

fn default_position_tolerance() -> f64 { 4.0 }
fn default_signature_tolerance() -> u32 { 6 }
fn default_luma_tolerance() -> u8 { 24 }
fn default_search_margin() -> i32 { 40 }
fn default_edge_min() -> f64 { 0.02 }
fn default_edge_max() -> f64 { 0.25 }

/// Outcome of re-sampling one element. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub element_id: String,
    pub passed: bool,
    /// Distance between cached and observed position, if the element was found.
    pub position_shift: Option<f64>,
    pub observed_bbox: Option<BBox>,
    pub signature_distance: Option<u32>,
    pub edge_density: Option<f64>,
    pub reason: Option<String>,
}

impl VerificationResult {
    fn failed(element_id: &str, reason: impl Into<String>) -> Self {
        VerificationResult {
            element_id: element_id.to_string(),
            passed: false,
            position_shift: None,
            observed_bbox: None,
            signature_distance: None,
            edge_density: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Located {
    dx: i32,
    dy: i32,
    distance: u32,
}

/// Compares an element's cached position and signature against a fresh frame.
///
/// Only the neighbourhood of the cached box is sampled. A failing result
/// blocks the action; deciding whether to rescan is left to the caller.
#[derive(Debug, Clone, Default)]
pub struct VisualVerifier {
    config: VerifierConfig,
}

impl VisualVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        VisualVerifier { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    pub fn verify(&self, element: &SemanticElement, frame: &Frame) -> VerificationResult {
        let id = element.id.as_str();

        let Some(expected) = element.signature else {
            return VerificationResult::failed(id, "no visual signature was recorded for this element");
        };

        let margin = self.config.search_margin.max(0);
        let neighbourhood = BBox::new(
            element.bbox.x - margin,
            element.bbox.y - margin,
            element.bbox.w + 2 * margin,
            element.bbox.h + 2 * margin,
        );
        let integral = LumaIntegral::from_region(frame, &neighbourhood);
        let Some(found) = self.locate(&integral, &element.bbox, &expected) else {
            return VerificationResult::failed(
                id,
                format!(
                    "no region within {}px matches the cached signature",
                    self.config.search_margin
                ),
            );
        };

        let observed = element.bbox.translate(found.dx, found.dy);
        let shift = ((found.dx * found.dx + found.dy * found.dy) as f64).sqrt();

        let mut result = VerificationResult {
            element_id: id.to_string(),
            passed: true,
            position_shift: Some(shift),
            observed_bbox: Some(observed),
            signature_distance: Some(found.distance),
            edge_density: None,
            reason: None,
        };

        if shift > self.config.position_tolerance {
            result.passed = false;
            result.reason = Some(format!(
                "element moved {shift:.1}px (tolerance {:.1}px)",
                self.config.position_tolerance
            ));
        } else if self.config.edge_check && element.kind.is_control() {
            let density = edge_density(frame, &observed);
            result.edge_density = density;
            match density {
                Some(d) if d >= self.config.edge_min && d <= self.config.edge_max => {}
                Some(d) => {
                    result.passed = false;
                    result.reason = Some(format!(
                        "edge density {d:.3} outside [{:.3}, {:.3}]",
                        self.config.edge_min, self.config.edge_max
                    ));
                }
                None => {
                    result.passed = false;
                    result.reason = Some("region too small to measure edge density".to_string());
                }
            }
        }

        debug!(
            element = id,
            passed = result.passed,
            shift,
            distance = found.distance,
            "verified element"
        );
        result
    }

    /// Find the offset whose region best matches `expected`. A region matches
    /// when both its hash and its mean luma are within tolerance. The cached
    /// position wins whenever it matches; otherwise the smallest distance
    /// wins, then the smallest displacement, then top-left first.
    fn locate(&self, integral: &LumaIntegral, cached: &BBox, expected: &VisualSignature) -> Option<Located> {
        let tolerance = self.config.signature_tolerance;
        let distance_at = |dx: i32, dy: i32| {
            integral
                .average_hash(&cached.translate(dx, dy))
                .filter(|sig| sig.luma_delta(expected) <= self.config.luma_tolerance)
                .map(|sig| sig.distance(expected))
        };

        if let Some(distance) = distance_at(0, 0)
            && distance <= tolerance
        {
            return Some(Located { dx: 0, dy: 0, distance });
        }

        let margin = self.config.search_margin.max(0);
        let mut best: Option<(Located, (u32, i32, i32, i32))> = None;
        for dy in -margin..=margin {
            for dx in -margin..=margin {
                let Some(distance) = distance_at(dx, dy) else {
                    continue;
                };
                let key = (distance, dx * dx + dy * dy, dy, dx);
                if best.as_ref().is_none_or(|(_, k)| key < *k) {
                    best = Some((Located { dx, dy, distance }, key));
                }
            }
        }

        best.map(|(loc, _)| loc).filter(|loc| loc.distance <= tolerance)
    }
}
