//! Property tests comparing `EntityRegistry` with a simple model.
//!
//! The model keeps, for every handle ever created, whether it is still held
//! by the caller and the sequence number of its current registration.

use std::sync::Arc;

use amqp_robust::registry::EntityRegistry;
use proptest::prelude::*;

const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug)]
struct Entity;

#[derive(Clone, Debug)]
enum Op {
    Insert(usize),
    Reinsert(usize),
    Drop(usize),
    Remove(usize),
}

struct Slot {
    name: &'static str,
    handle: Option<Arc<Entity>>,
    seq: Option<u64>,
}

#[derive(Default)]
struct Model {
    slots: Vec<Slot>,
    next_seq: u64,
}

impl Model {
    fn expected(&self) -> Vec<Arc<Entity>> {
        let mut live: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| Some((slot.seq?, slot.handle.clone()?)))
            .collect();
        live.sort_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, handle)| handle).collect()
    }

    fn tracks(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.name == name && slot.seq.is_some() && slot.handle.is_some())
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NAMES.len()).prop_map(Op::Insert),
        (0..16usize).prop_map(Op::Reinsert),
        (0..16usize).prop_map(Op::Drop),
        (0..NAMES.len()).prop_map(Op::Remove),
    ]
}

fn apply(registry: &EntityRegistry<Entity>, model: &mut Model, op: &Op) -> Result<(), TestCaseError> {
    match *op {
        Op::Insert(name) => {
            let handle = Arc::new(Entity);
            registry.insert(NAMES[name], &handle);
            model.slots.push(Slot {
                name: NAMES[name],
                handle: Some(handle),
                seq: Some(model.next_seq),
            });
            model.next_seq += 1;
        }
        Op::Reinsert(index) if !model.slots.is_empty() => {
            let next_seq = model.next_seq;
            let slots_len = model.slots.len();
            let slot = &mut model.slots[index % slots_len];
            if let Some(handle) = &slot.handle {
                registry.insert(slot.name, handle);
                if slot.seq.is_none() {
                    slot.seq = Some(next_seq);
                    model.next_seq += 1;
                }
            }
        }
        Op::Drop(index) if !model.slots.is_empty() => {
            let len = model.slots.len();
            model.slots[index % len].handle = None;
        }
        Op::Remove(name) => {
            let name = NAMES[name];
            prop_assert_eq!(registry.remove(name), model.tracks(name));
            for slot in model.slots.iter_mut().filter(|slot| slot.name == name) {
                slot.seq = None;
            }
        }
        Op::Reinsert(_) | Op::Drop(_) => {}
    }
    Ok(())
}

proptest! {
    #[test]
    fn registry_matches_model(ops in proptest::collection::vec(op_strategy(), 0..48)) {
        let registry = EntityRegistry::default();
        let mut model = Model::default();
        for op in &ops {
            apply(&registry, &mut model, op)?;

            let expected = model.expected();
            let actual = registry.snapshot();
            prop_assert_eq!(actual.len(), expected.len());
            for (got, want) in actual.iter().zip(&expected) {
                prop_assert!(Arc::ptr_eq(got, want), "snapshot order diverged after {:?}", op);
            }
            prop_assert_eq!(registry.len(), expected.len());
        }
    }
}
