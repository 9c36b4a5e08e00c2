//! Distance metrics for vector similarity calculations.
//!
//! Both kernels are pure, allocation-free, and fused: a single pass over the
//! input accumulates every partial sum. Loops are written over 4-wide chunks
//! so the compiler can keep the accumulators in vector registers.

use serde::{Deserialize, Serialize};

/// Distance metric fixed at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance: `1 - (u·v) / (‖u‖·‖v‖)`.
    /// Best for normalized embeddings; zero-norm inputs yield distance 1.0.
    Cosine,

    /// Euclidean distance (L2 norm). Best when magnitude matters.
    Euclidean,
}

impl DistanceMetric {
    /// Computes the distance between two equal-length vectors.
    ///
    /// Lower is always more similar. Commutative. For Euclidean,
    /// `distance(x, x) == 0` within float tolerance; for cosine this holds
    /// iff `‖x‖ > 0` (two zero vectors are 1.0 apart by convention).
    ///
    /// Callers guarantee `a.len() == b.len()` and finite elements; the
    /// public index API validates both before reaching this hot path.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::Euclidean => euclidean_distance(a, b),
        }
    }

    /// Stable tag used by the persistence header.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Cosine => 0,
            Self::Euclidean => 1,
        }
    }

    /// Inverse of [`DistanceMetric::tag`].
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Cosine),
            1 => Some(Self::Euclidean),
            _ => None,
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cosine => write!(f, "cosine"),
            Self::Euclidean => write!(f, "euclidean"),
        }
    }
}

/// Cosine distance with the zero-norm convention.
///
/// A single fused pass accumulates dot product and both squared norms.
#[inline]
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = [0.0f32; 4];
    let mut na = [0.0f32; 4];
    let mut nb = [0.0f32; 4];

    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rem_a = chunks_a.remainder();
    let rem_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for i in 0..4 {
            dot[i] = ca[i].mul_add(cb[i], dot[i]);
            na[i] = ca[i].mul_add(ca[i], na[i]);
            nb[i] = cb[i].mul_add(cb[i], nb[i]);
        }
    }

    let mut dot_sum = dot[0] + dot[1] + dot[2] + dot[3];
    let mut na_sum = na[0] + na[1] + na[2] + na[3];
    let mut nb_sum = nb[0] + nb[1] + nb[2] + nb[3];

    for (x, y) in rem_a.iter().zip(rem_b.iter()) {
        dot_sum = x.mul_add(*y, dot_sum);
        na_sum = x.mul_add(*x, na_sum);
        nb_sum = y.mul_add(*y, nb_sum);
    }

    let norm = na_sum.sqrt() * nb_sum.sqrt();
    if norm == 0.0 {
        return 1.0;
    }
    1.0 - dot_sum / norm
}

/// Euclidean (L2) distance.
#[inline]
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];

    let chunks_a = a.chunks_exact(4);
    let chunks_b = b.chunks_exact(4);
    let rem_a = chunks_a.remainder();
    let rem_b = chunks_b.remainder();

    for (ca, cb) in chunks_a.zip(chunks_b) {
        for i in 0..4 {
            let d = ca[i] - cb[i];
            acc[i] = d.mul_add(d, acc[i]);
        }
    }

    let mut sum = acc[0] + acc[1] + acc[2] + acc[3];
    for (x, y) in rem_a.iter().zip(rem_b.iter()) {
        let d = x - y;
        sum = d.mul_add(d, sum);
    }

    sum.sqrt()
}
