//! Label-to-control pairing by biased distance.
//!
//! Reading order puts a field to the right of or below its caption, so those
//! candidates get their distance scaled down and candidates above or to the
//! left get it scaled up. Everything here is a pure function of its inputs.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::model::{element::SemanticElement, geometry::BBox, ui_map::UiMap};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasPolicy {
    /// Multiplier for candidates right of or below the label (< 1 prefers them).
    #[serde(default = "default_forward_weight")]
    pub forward_weight: f64,

    /// Multiplier for candidates left of or above the label (> 1 penalizes them).
    #[serde(default = "default_backward_weight")]
    pub backward_weight: f64,

    /// Candidates whose raw center distance exceeds this are ignored.
    #[serde(default = "default_max_radius")]
    pub max_radius: f64,

    /// Report a tie that only id order could break as ambiguous.
    #[serde(default)]
    pub reject_id_order_ties: bool,
}

impl Default for BiasPolicy {
    fn default() -> Self {
        Self {
            forward_weight: default_forward_weight(),
            backward_weight: default_backward_weight(),
            max_radius: default_max_radius(),
            reject_id_order_ties: false,
        }
    }
}

fn default_forward_weight() -> f64 { 0.8 }
fn default_backward_weight() -> f64 { 1.25 }
fn default_max_radius() -> f64 { 400.0 }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Right,
    Below,
    Left,
    Above,
    Center,
}

/// Direction of `candidate` as seen from `label`, by the dominant axis of
/// the center offset. Exact diagonals count as horizontal.
pub fn direction_of(label: &BBox, candidate: &BBox) -> Direction {
    let (lx, ly) = label.center();
    let (cx, cy) = candidate.center();
    let dx = cx - lx;
    let dy = cy - ly;

    if dx == 0.0 && dy == 0.0 {
        Direction::Center
    } else if dx.abs() >= dy.abs() {
        if dx > 0.0 { Direction::Right } else { Direction::Left }
    } else if dy > 0.0 {
        Direction::Below
    } else {
        Direction::Above
    }
}

impl BiasPolicy {
    pub fn weight(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Right | Direction::Below => self.forward_weight,
            Direction::Left | Direction::Above => self.backward_weight,
            Direction::Center => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub raw_distance: f64,
    pub score: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pairing {
    Paired(String),
    /// Top candidates tie on score and raw distance.
    Ambiguous(Vec<String>),
    NoCandidate,
}

/// All buttons and inputs within the search radius, best first.
pub fn rank_candidates<'a, I>(label: &SemanticElement, elements: I, policy: &BiasPolicy) -> Vec<Candidate>
where
    I: IntoIterator<Item = &'a SemanticElement>,
{
    let mut ranked: Vec<Candidate> = elements
        .into_iter()
        .filter(|el| el.id != label.id && el.kind.is_control())
        .filter_map(|el| {
            let raw_distance = label.bbox.center_distance(&el.bbox);
            if raw_distance > policy.max_radius {
                return None;
            }
            let direction = direction_of(&label.bbox, &el.bbox);
            Some(Candidate {
                id: el.id.clone(),
                raw_distance,
                score: raw_distance * policy.weight(direction),
                direction,
            })
        })
        .collect();

    ranked.sort_by(compare_candidates);
    ranked
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    a.score
        .total_cmp(&b.score)
        .then(a.raw_distance.total_cmp(&b.raw_distance))
        .then_with(|| a.id.cmp(&b.id))
}

/// Best control for `label_id` in `map`, or `None` when the id is unknown
/// or nothing lies within the search radius.
pub fn pair_label_to_control(map: &UiMap, label_id: &str, policy: &BiasPolicy) -> Option<String> {
    let label = map.get(label_id)?;
    rank_candidates(label, map.elements(), policy)
        .into_iter()
        .next()
        .map(|c| c.id)
}

/// Like `pair_label_to_control`, but surfaces id-order-only ties when the
/// policy asks for it.
pub fn pair_strict(map: &UiMap, label_id: &str, policy: &BiasPolicy) -> Pairing {
    let Some(label) = map.get(label_id) else {
        return Pairing::NoCandidate;
    };

    let ranked = rank_candidates(label, map.elements(), policy);
    let Some(best) = ranked.first() else {
        return Pairing::NoCandidate;
    };

    if policy.reject_id_order_ties {
        let tied: Vec<String> = ranked
            .iter()
            .take_while(|c| c.score == best.score && c.raw_distance == best.raw_distance)
            .map(|c| c.id.clone())
            .collect();
        if tied.len() > 1 {
            return Pairing::Ambiguous(tied);
        }
    }

    Pairing::Paired(best.id.clone())
}
