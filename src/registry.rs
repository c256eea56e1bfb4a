//! Weakly-held registry of declared entities.
//!
//! `EntityRegistry` maps a declared name to every live handle declared
//! under it, without keeping any of them alive. Entities the caller has
//! dropped vanish on the next prune, so a recovery cycle never re-declares
//! something nobody holds anymore. Dead entries are pruned at insertion and
//! snapshot time.

use std::sync::{
    Arc,
    Weak,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

struct Entry<E> {
    seq: u64,
    entity: Weak<E>,
}

/// Concurrent registry of weakly-held entities keyed by name.
pub struct EntityRegistry<E> {
    entries: DashMap<String, Vec<Entry<E>>>,
    next_seq: AtomicU64,
}

impl<E> Default for EntityRegistry<E> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }
}

impl<E> EntityRegistry<E> {
    /// Track `entity` under `name`.
    ///
    /// Registering the same handle twice is a no-op.
    pub fn insert(&self, name: &str, entity: &Arc<E>) {
        let mut slot = self.entries.entry(name.to_owned()).or_default();
        slot.retain(|entry| entry.entity.strong_count() > 0);
        if slot
            .iter()
            .any(|entry| Weak::as_ptr(&entry.entity) == Arc::as_ptr(entity))
        {
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        slot.push(Entry {
            seq,
            entity: Arc::downgrade(entity),
        });
    }

    /// Forget every entity registered under `name`.
    ///
    /// Returns whether any live entity was tracked under the name.
    pub fn remove(&self, name: &str) -> bool {
        self.entries.remove(name).is_some_and(|(_, slot)| {
            slot.iter().any(|entry| entry.entity.strong_count() > 0)
        })
    }

    /// Prune stale references, then collect every live entity in the order
    /// it was first registered.
    ///
    /// The returned handles keep the entities alive for as long as the
    /// caller iterates, and later mutation of the registry does not affect
    /// the snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<E>> {
        let mut live = Vec::with_capacity(self.entries.len());
        self.entries.retain(|_, slot| {
            slot.retain(|entry| match entry.entity.upgrade() {
                Some(entity) => {
                    live.push((entry.seq, entity));
                    true
                }
                None => false,
            });
            !slot.is_empty()
        });
        live.sort_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, entity)| entity).collect()
    }

    /// Number of live entities across all names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|slot| {
                slot.iter()
                    .filter(|entry| entry.entity.strong_count() > 0)
                    .count()
            })
            .sum()
    }

    /// Whether no live entity is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests;
