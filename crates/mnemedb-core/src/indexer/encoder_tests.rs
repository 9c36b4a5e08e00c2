//! Tests for the pattern encoder.

use super::encoder::{PatternEncoder, DEFAULT_DIMENSION};
use super::pattern::Pattern;

fn sample() -> Pattern {
    Pattern::new("load_spike", 0.9)
        .with_description("queue depth rising across shards")
        .with_tag("s1")
        .with_tag("ops")
        .with_metric("queue_depth", 120.0)
        .with_metric("latency_ms", 42.5)
}

#[test]
fn test_default_dimension_is_100() {
    assert_eq!(DEFAULT_DIMENSION, 100);
    assert_eq!(PatternEncoder::default().dimension(), 100);
}

#[test]
fn test_output_length_matches_dimension() {
    for dim in [1, 10, 50, 100, 256] {
        let encoder = PatternEncoder::new(dim);
        assert_eq!(encoder.encode(&sample()).len(), dim);
    }
}

#[test]
fn test_encoding_is_deterministic() {
    let encoder = PatternEncoder::default();
    let a = encoder.encode(&sample());
    let b = encoder.encode(&sample());
    assert_eq!(a, b, "equal records must encode bit-identically");
}

#[test]
fn test_output_is_unit_length() {
    let encoder = PatternEncoder::default();
    for pattern in [
        sample(),
        Pattern::new("x", 1.0),
        Pattern::new("", 0.5),
        Pattern::new("only_metrics", 0.8).with_metric("m", -3.0),
    ] {
        let v = encoder.encode(&pattern);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 1e-5,
            "vector for {:?} has norm {norm}",
            pattern.kind
        );
        assert!(v.iter().all(|x| x.is_finite()));
    }
}

#[test]
fn test_tag_order_does_not_matter() {
    let encoder = PatternEncoder::default();
    let a = Pattern::new("k", 0.9).with_tag("alpha").with_tag("beta");
    let b = Pattern::new("k", 0.9).with_tag("beta").with_tag("alpha");
    assert_eq!(encoder.encode(&a), encoder.encode(&b));
}

#[test]
fn test_duplicate_tags_collapse() {
    let encoder = PatternEncoder::default();
    let once = Pattern::new("k", 0.9).with_tag("alpha");
    let twice = Pattern::new("k", 0.9).with_tag("alpha").with_tag("alpha");
    assert_eq!(encoder.encode(&once), encoder.encode(&twice));
}

#[test]
fn test_different_kinds_usually_differ() {
    let encoder = PatternEncoder::default();
    let a = encoder.encode(&Pattern::new("load_spike", 0.9));
    let b = encoder.encode(&Pattern::new("coordination_drift", 0.9));
    assert_ne!(a, b);
}

#[test]
fn test_truncated_dimension_still_unit_length() {
    // Dimension 4 cuts off every block except the head of the kind block.
    let encoder = PatternEncoder::new(4);
    let v = encoder.encode(&sample());
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-5);
}

#[test]
fn test_metrics_influence_their_block_only() {
    let encoder = PatternEncoder::default();
    let base = Pattern::new("k", 0.9);
    let with_metric = Pattern::new("k", 0.9).with_metric("cpu", 2.0);

    let a = encoder.encode(&base);
    let b = encoder.encode(&with_metric);
    assert_ne!(a, b);

    // The shared kind block keeps the two encodings positively aligned.
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    assert!(dot > 0.0);
    // Tag and text blocks are untouched in both.
    assert!(a[16..48].iter().all(|v| *v == 0.0));
    assert!(b[16..48].iter().all(|v| *v == 0.0));
}
