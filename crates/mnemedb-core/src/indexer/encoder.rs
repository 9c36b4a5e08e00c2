//! Deterministic pattern-to-vector encoder.
//!
//! The encoder composes fixed-width feature blocks concatenated in a fixed
//! order: kind (16), tags (32), metrics (32), description (20). Blocks are
//! laid into the configured dimension front to back; positions past the
//! dimension are truncated and unused trailing positions stay zero. Tags are
//! sorted before hashing, so reordering independent tags cannot change the
//! output; metrics iterate in `BTreeMap` key order for the same reason. The
//! result is L2-normalized to unit length.

use super::pattern::Pattern;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

const KIND_BLOCK: usize = 16;
const TAG_BLOCK: usize = 32;
const METRIC_BLOCK: usize = 32;
const TEXT_BLOCK: usize = 20;

/// Default output dimension, the sum of all block widths.
pub const DEFAULT_DIMENSION: usize = KIND_BLOCK + TAG_BLOCK + METRIC_BLOCK + TEXT_BLOCK;

/// Encodes [`Pattern`] records into fixed-length unit vectors.
///
/// Total and deterministic: every record yields exactly one vector of the
/// configured dimension, and equal records yield bit-equal vectors.
#[derive(Debug, Clone)]
pub struct PatternEncoder {
    dimension: usize,
}

impl Default for PatternEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl PatternEncoder {
    /// Creates an encoder producing vectors of `dimension` elements.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Output dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Encodes a record into an L2-normalized vector.
    #[must_use]
    pub fn encode(&self, pattern: &Pattern) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension];

        self.bump(&mut out, 0, KIND_BLOCK, slot_of(&pattern.kind, KIND_BLOCK), 1.0);

        let mut tags: Vec<&str> = pattern.tags.iter().map(String::as_str).collect();
        tags.sort_unstable();
        tags.dedup();
        for tag in tags {
            self.bump(&mut out, KIND_BLOCK, TAG_BLOCK, slot_of(tag, TAG_BLOCK), 1.0);
        }

        let metric_base = KIND_BLOCK + TAG_BLOCK;
        for (name, &value) in &pattern.metrics {
            #[allow(clippy::cast_possible_truncation)]
            let squashed = value.tanh() as f32;
            self.bump(
                &mut out,
                metric_base,
                METRIC_BLOCK,
                slot_of(name, METRIC_BLOCK),
                squashed,
            );
        }

        let text_base = metric_base + METRIC_BLOCK;
        for ch in pattern.description.chars() {
            let slot = (ch as usize) % TEXT_BLOCK;
            self.bump(&mut out, text_base, TEXT_BLOCK, slot, 0.25);
        }

        normalize(&mut out);
        out
    }

    /// Adds `weight` at `base + slot`, truncating blocks that overrun the
    /// configured dimension.
    fn bump(&self, out: &mut [f32], base: usize, width: usize, slot: usize, weight: f32) {
        debug_assert!(slot < width);
        let position = base + slot;
        if position < self.dimension {
            out[position] += weight;
        }
    }
}

/// Stable block slot for a string feature.
fn slot_of(feature: &str, width: usize) -> usize {
    let mut hasher = FxHasher::default();
    feature.hash(&mut hasher);
    (hasher.finish() as usize) % width
}

/// Scales to unit length. An all-zero accumulation (possible only when every
/// block is truncated away) is mapped to a unit vector on the first axis so
/// the output is always valid under cosine distance.
fn normalize(out: &mut [f32]) {
    let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in out.iter_mut() {
            *v /= norm;
        }
    } else if let Some(first) = out.first_mut() {
        *first = 1.0;
    }
}
