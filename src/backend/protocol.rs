use serde::Serialize;

use crate::backend::traits::TemplateSpec;

/// Request sent to a helper process on stdin (one JSON line).
///
/// The reply is an `IsolatedReply` envelope whose `data` depends on `cmd`:
/// `window_meta` -> `WindowMeta`, `enumerate` -> `[RawStructuralElement]`,
/// `detect_text` / `match_templates` -> `[VisualDetection]`, everything else -> null.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum HelperRequest<'a> {
    WindowMeta {
        cmd: &'static str,
        window: &'a str,
    },
    Enumerate {
        cmd: &'static str,
        window: &'a str,
    },
    Capture {
        cmd: &'static str,
        window: &'a str,
        /// PNG destination the helper writes to.
        path: String,
    },
    Click {
        cmd: &'static str,
        x: i32,
        y: i32,
    },
    TypeText {
        cmd: &'static str,
        text: &'a str,
    },
    DetectText {
        cmd: &'static str,
        image: String,
    },
    MatchTemplates {
        cmd: &'static str,
        image: String,
        templates: &'a [TemplateSpec],
    },
}

impl<'a> HelperRequest<'a> {
    pub fn window_meta(window: &'a str) -> Self {
        HelperRequest::WindowMeta {
            cmd: "window_meta",
            window,
        }
    }

    pub fn enumerate(window: &'a str) -> Self {
        HelperRequest::Enumerate {
            cmd: "enumerate",
            window,
        }
    }

    pub fn capture(window: &'a str, path: &str) -> Self {
        HelperRequest::Capture {
            cmd: "capture",
            window,
            path: path.to_string(),
        }
    }

    pub fn click(x: i32, y: i32) -> Self {
        HelperRequest::Click { cmd: "click", x, y }
    }

    pub fn type_text(text: &'a str) -> Self {
        HelperRequest::TypeText {
            cmd: "type_text",
            text,
        }
    }

    pub fn detect_text(image: &str) -> Self {
        HelperRequest::DetectText {
            cmd: "detect_text",
            image: image.to_string(),
        }
    }

    pub fn match_templates(image: &str, templates: &'a [TemplateSpec]) -> Self {
        HelperRequest::MatchTemplates {
            cmd: "match_templates",
            image: image.to_string(),
            templates,
        }
    }
}
