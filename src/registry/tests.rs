//! Unit tests for the entity registry.

use std::sync::Arc;

use rstest::{fixture, rstest};

use super::*;

#[derive(Debug, PartialEq)]
struct Entity(&'static str);

#[expect(
    unused_braces,
    reason = "rustc false positive for single-line rstest fixtures"
)]
#[fixture]
fn registry() -> EntityRegistry<Entity> { EntityRegistry::default() }

#[rstest]
fn live_entities_are_returned(registry: EntityRegistry<Entity>) {
    let x = Arc::new(Entity("x"));
    registry.insert("x", &x);

    assert_eq!(registry.snapshot(), vec![x.clone()]);
    assert_eq!(registry.len(), 1);
}

#[rstest]
fn unknown_name_is_not_removed(registry: EntityRegistry<Entity>) {
    assert!(!registry.remove("missing"));
    assert!(registry.is_empty());
}

#[rstest]
fn dropped_entity_disappears_without_delete(registry: EntityRegistry<Entity>) {
    let kept = Arc::new(Entity("kept"));
    let dropped = Arc::new(Entity("dropped"));
    registry.insert("kept", &kept);
    registry.insert("dropped", &dropped);
    drop(dropped);

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.snapshot(), vec![kept]);
    assert!(!registry.remove("dropped"));
}

#[rstest]
fn snapshot_preserves_registration_order(registry: EntityRegistry<Entity>) {
    let handles: Vec<_> = ["c", "a", "b"].into_iter().map(|n| Arc::new(Entity(n))).collect();
    for handle in &handles {
        registry.insert(handle.0, handle);
    }

    let order: Vec<_> = registry.snapshot().iter().map(|e| e.0).collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

#[rstest]
fn several_handles_share_a_name(registry: EntityRegistry<Entity>) {
    let first = Arc::new(Entity("q"));
    let second = Arc::new(Entity("q"));
    registry.insert("q", &first);
    registry.insert("q", &second);
    registry.insert("q", &first);

    assert_eq!(registry.snapshot().len(), 2);
    assert!(registry.remove("q"));
    assert!(registry.is_empty());
    assert!(!registry.remove("q"));
}

#[rstest]
fn remove_reports_only_live_entries(registry: EntityRegistry<Entity>) {
    let gone = Arc::new(Entity("gone"));
    registry.insert("gone", &gone);
    drop(gone);

    assert!(!registry.remove("gone"));
}

#[rstest]
fn snapshot_is_stable_under_mutation(registry: EntityRegistry<Entity>) {
    let a = Arc::new(Entity("a"));
    registry.insert("a", &a);
    let snapshot = registry.snapshot();

    let b = Arc::new(Entity("b"));
    registry.insert("b", &b);
    registry.remove("a");

    assert_eq!(snapshot, vec![a]);
    assert_eq!(registry.snapshot(), vec![b]);
}

#[rstest]
fn reinserting_after_drop_tracks_the_new_handle(registry: EntityRegistry<Entity>) {
    let old = Arc::new(Entity("temp"));
    registry.insert("temp", &old);
    drop(old);
    assert!(registry.is_empty());

    let new = Arc::new(Entity("temp"));
    registry.insert("temp", &new);
    assert_eq!(registry.snapshot(), vec![new]);
}
