use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{element::SemanticElement, fingerprint::WindowFingerprint};

pub const SCHEMA_VERSION: u32 = 2;

/// Complete set of semantic elements for one fingerprint at one instant.
///
/// There is no `&mut` API: once built a map is only read. A rescan makes a
/// new map and the cache supersedes the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiMap {
    fingerprint: WindowFingerprint,
    built_at: DateTime<Utc>,
    schema_version: u32,
    elements: BTreeMap<String, SemanticElement>,
}

impl UiMap {
    pub fn new(fingerprint: WindowFingerprint, elements: Vec<SemanticElement>) -> Self {
        Self::from_parts(fingerprint, Utc::now(), SCHEMA_VERSION, elements)
    }

    pub fn empty(fingerprint: WindowFingerprint) -> Self {
        Self::new(fingerprint, Vec::new())
    }

    pub fn from_parts(
        fingerprint: WindowFingerprint,
        built_at: DateTime<Utc>,
        schema_version: u32,
        elements: Vec<SemanticElement>,
    ) -> Self {
        UiMap {
            fingerprint,
            built_at,
            schema_version,
            elements: elements.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Take the map apart to derive a new one (e.g. with signatures attached).
    pub fn into_parts(self) -> (WindowFingerprint, DateTime<Utc>, u32, Vec<SemanticElement>) {
        (
            self.fingerprint,
            self.built_at,
            self.schema_version,
            self.elements.into_values().collect(),
        )
    }

    pub fn fingerprint(&self) -> &WindowFingerprint {
        &self.fingerprint
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn get(&self, id: &str) -> Option<&SemanticElement> {
        self.elements.get(id)
    }

    /// Elements in id order.
    pub fn elements(&self) -> impl Iterator<Item = &SemanticElement> {
        self.elements.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.elements.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
