//! Scene reports handed to the external reasoning collaborator.

use serde::Serialize;

use crate::model::{
    geometry::{BBox, WindowMeta},
    ui_map::UiMap,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneEntry {
    pub id: String,
    pub kind: String,
    pub text: Option<String>,
    pub confidence: f32,
    /// Window-relative.
    pub bbox: BBox,
    pub paired_with: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneReport {
    pub title: Option<String>,
    pub resolution: Option<(i32, i32)>,
    pub fingerprint: Option<String>,
    pub requested: Option<String>,
    pub reason: String,
    pub elements: Vec<SceneEntry>,
}

impl SceneReport {
    pub fn new(
        meta: Option<&WindowMeta>,
        map: Option<&UiMap>,
        requested: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        let elements = map
            .map(|m| {
                m.elements()
                    .map(|el| SceneEntry {
                        id: el.id.clone(),
                        kind: el.kind.name().to_string(),
                        text: el.text().map(str::to_string),
                        confidence: el.confidence,
                        bbox: el.bbox,
                        paired_with: el.paired_with.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        SceneReport {
            title: meta.map(|m| m.title.clone()),
            resolution: meta.map(|m| (m.rect.w, m.rect.h)),
            fingerprint: map.map(|m| m.fingerprint().to_string()),
            requested: requested.map(str::to_string),
            reason: reason.into(),
            elements,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_markdown(&self) -> String {
        let mut md = String::from("# Desktop Scene Report\n\n");

        if let Some(title) = &self.title {
            md.push_str(&format!("**Window Title:** {}\n", title));
        }
        if let Some((w, h)) = self.resolution {
            md.push_str(&format!("**Resolution:** {}x{}\n", w, h));
        }
        if let Some(fp) = &self.fingerprint {
            md.push_str(&format!("**Fingerprint:** `{}`\n", fp));
        }
        if let Some(requested) = &self.requested {
            md.push_str(&format!("**Requested:** `{}`\n", requested));
        }
        md.push_str(&format!("**Reason:** {}\n\n", self.reason));

        if self.elements.is_empty() {
            md.push_str("_No elements were recognized in this window._\n");
        } else {
            md.push_str("| ID | Kind | Text | Confidence | BBox |\n");
            md.push_str("| :--- | :--- | :--- | :--- | :--- |\n");
            for el in &self.elements {
                md.push_str(&format!(
                    "| {} | {} | {} | {:.2} | ({}, {}, {}, {}) |\n",
                    el.id,
                    el.kind,
                    escape_cell(el.text.as_deref().unwrap_or("N/A")),
                    el.confidence,
                    el.bbox.x,
                    el.bbox.y,
                    el.bbox.w,
                    el.bbox.h
                ));
            }
        }

        md.push_str("\n## Next Step\n");
        md.push_str("- [ ] Action required: provide the next semantic id to interact with.\n");
        md
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
