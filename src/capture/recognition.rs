use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::traits::{RecognitionEngine, TemplateSpec},
    error::UiMapError,
    isolation::deadline::Deadline,
    model::signals::{DetectionSource, Frame, VisualDetection},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Detections below this confidence are dropped.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f32,

    /// Matches of one template closer than this (center to center) collapse.
    #[serde(default = "default_cluster_radius")]
    pub cluster_radius: f64,

    #[serde(default)]
    pub templates: Vec<TemplateSpec>,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            confidence_floor: default_confidence_floor(),
            cluster_radius: default_cluster_radius(),
            templates: vec![],
        }
    }
}

fn default_confidence_floor() -> f32 { 0.8 }
fn default_cluster_radius() -> f64 { 20.0 }

/// Run text recognition and template matching over a window frame.
///
/// Works on pixels alone, so it still yields elements when the structural
/// tree is empty. Returned boxes are absolute.
pub fn recognize(
    engine: &dyn RecognitionEngine,
    frame: &Frame,
    config: &RecognitionConfig,
    timeout: Duration,
) -> Result<Vec<VisualDetection>, UiMapError> {
    let budget = Deadline::after(timeout);

    let mut detections = engine.detect_text(frame, budget.stage_slice(timeout, "detect_text")?)?;
    let matches = engine.match_templates(
        frame,
        &config.templates,
        budget.stage_slice(timeout, "match_templates")?,
    )?;
    detections.extend(cluster_matches(matches, config.cluster_radius));

    let total = detections.len();
    let kept: Vec<VisualDetection> = detections
        .into_iter()
        .filter(|d| d.confidence >= config.confidence_floor)
        .map(|mut d| {
            d.bbox = d.bbox.translate(frame.origin.x, frame.origin.y);
            d
        })
        .collect();

    debug!(total, kept = kept.len(), floor = config.confidence_floor, "recognition done");
    Ok(kept)
}

/// Collapse overlapping hits of the same template, strongest first.
pub fn cluster_matches(mut matches: Vec<VisualDetection>, radius: f64) -> Vec<VisualDetection> {
    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.bbox.y.cmp(&b.bbox.y))
            .then(a.bbox.x.cmp(&b.bbox.x))
    });

    let mut kept: Vec<VisualDetection> = Vec::new();
    for m in matches {
        let duplicate = m.source != DetectionSource::Ocr
            && kept.iter().any(|k| {
                k.source == m.source
                    && k.template_id == m.template_id
                    && k.bbox.center_distance(&m.bbox) < radius
            });
        if !duplicate {
            kept.push(m);
        }
    }
    kept
}
