//! Domain record ingested by the pattern indexer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An observed pattern produced by the surrounding detection pipeline.
///
/// Only `kind` and `confidence` matter to admission; everything else is
/// carried into the encoder and the stored metadata verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Producer-assigned identifier, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Pattern category (e.g. `"load_spike"`, `"coordination_drift"`).
    pub kind: String,
    /// Detector confidence in `[0, 1]`. Records without one are rejected.
    #[serde(default)]
    pub confidence: Option<f32>,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Qualitative labels.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named measurements attached to the observation. Ordered so the
    /// encoding never depends on producer-side map order.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// When the producer observed the pattern (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<u64>,
}

impl Pattern {
    /// Creates a pattern with the given kind and confidence.
    #[must_use]
    pub fn new(kind: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            confidence: Some(confidence),
            description: String::new(),
            tags: Vec::new(),
            metrics: BTreeMap::new(),
            detected_at: None,
        }
    }

    /// Sets the producer id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Adds a named measurement.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Sets the observation timestamp.
    #[must_use]
    pub fn with_detected_at(mut self, unix_secs: u64) -> Self {
        self.detected_at = Some(unix_secs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let pattern = Pattern::new("load_spike", 0.9)
            .with_id("p-1")
            .with_description("sustained queue growth")
            .with_tag("s1")
            .with_metric("queue_depth", 120.0)
            .with_detected_at(1_700_000_000);

        assert_eq!(pattern.kind, "load_spike");
        assert_eq!(pattern.confidence, Some(0.9));
        assert_eq!(pattern.tags, vec!["s1"]);
        assert_eq!(pattern.metrics.get("queue_depth"), Some(&120.0));
    }

    #[test]
    fn test_serde_defaults_tolerate_sparse_records() {
        let pattern: Pattern = serde_json::from_str(r#"{"kind": "anomaly"}"#).unwrap();
        assert_eq!(pattern.kind, "anomaly");
        assert_eq!(pattern.confidence, None);
        assert!(pattern.tags.is_empty());
        assert!(pattern.metrics.is_empty());
    }
}
