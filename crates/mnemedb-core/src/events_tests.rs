//! Tests for the event bus.

use super::distance::DistanceMetric;
use super::events::{EventBus, OpEvent, OpKind, ParamsSnapshot};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn sample_event(op: OpKind, items: usize) -> OpEvent {
    OpEvent {
        op,
        duration: Duration::from_micros(42),
        items,
        ok: true,
        params: ParamsSnapshot {
            m: 16,
            ef_construction: 200,
            ef_search: 200,
            metric: DistanceMetric::Cosine,
            dimension: Some(3),
        },
    }
}

#[test]
fn test_subscribe_receives_events() {
    let bus = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let seen_clone = Arc::clone(&seen);
    bus.subscribe(move |event| {
        assert_eq!(event.op, OpKind::Insert);
        seen_clone.fetch_add(event.items, Ordering::SeqCst);
    });

    bus.emit(&sample_event(OpKind::Insert, 3));
    bus.emit(&sample_event(OpKind::Insert, 2));

    assert_eq!(seen.load(Ordering::SeqCst), 5);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let bus = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));

    let seen_clone = Arc::clone(&seen);
    let token = bus.subscribe(move |_| {
        seen_clone.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&sample_event(OpKind::Search, 1));
    assert!(bus.unsubscribe(token));
    assert!(!bus.unsubscribe(token), "double unsubscribe returns false");
    bus.emit(&sample_event(OpKind::Search, 1));

    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(bus.observer_count(), 0);
}

#[test]
fn test_multiple_observers_all_fire() {
    let bus = EventBus::new();
    let a = Arc::new(AtomicUsize::new(0));
    let b = Arc::new(AtomicUsize::new(0));

    let a_clone = Arc::clone(&a);
    bus.subscribe(move |_| {
        a_clone.fetch_add(1, Ordering::SeqCst);
    });
    let b_clone = Arc::clone(&b);
    bus.subscribe(move |_| {
        b_clone.fetch_add(1, Ordering::SeqCst);
    });

    bus.emit(&sample_event(OpKind::Persist, 0));

    assert_eq!(a.load(Ordering::SeqCst), 1);
    assert_eq!(b.load(Ordering::SeqCst), 1);
}

#[test]
fn test_op_kind_names() {
    assert_eq!(OpKind::SearchBatch.as_str(), "search_batch");
    assert_eq!(OpKind::Prune.as_str(), "prune");
    assert_eq!(OpKind::Load.as_str(), "load");
}
