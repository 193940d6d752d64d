use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::model::geometry::WindowMeta;

/// Cache key for "the same logical screen": sha1 over title and window size.
/// Window position is deliberately left out so a moved window keeps its map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowFingerprint(String);

impl WindowFingerprint {
    pub fn compute(title: &str, width: i32, height: i32) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(format!("{}|{}x{}", title, width, height).as_bytes());
        WindowFingerprint(format!("{:x}", hasher.finalize()))
    }

    pub fn of(meta: &WindowMeta) -> Self {
        Self::compute(&meta.title, meta.rect.w, meta.rect.h)
    }

    /// Wrap an already computed key (e.g. read back from storage).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        WindowFingerprint(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WindowFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
