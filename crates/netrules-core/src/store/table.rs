// ── Concurrent keyed table ──
//
// One `DashMap` per entity type, plus a monotonically increasing id
// sequence. Listings are sorted by key so that callers see rows in
// insertion order.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub(crate) struct Table<K, T> {
    rows: DashMap<K, T>,
    sequence: AtomicU64,
}

impl<K, T> Table<K, T>
where
    K: Copy + Eq + Hash + Ord + From<u64> + Into<u64>,
    T: Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            rows: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Reserve the next unused key.
    pub(crate) fn next_id(&self) -> K {
        K::from(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Insert a row under a key that must not exist yet. Returns `false`
    /// (and leaves the table untouched) when it does.
    pub(crate) fn insert_new(&self, key: K, row: T) -> bool {
        self.sequence.fetch_max(key.into(), Ordering::SeqCst);
        match self.rows.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(row);
                true
            }
        }
    }

    pub(crate) fn get(&self, key: K) -> Option<T> {
        self.rows.get(&key).map(|r| r.value().clone())
    }

    pub(crate) fn contains(&self, key: K) -> bool {
        self.rows.contains_key(&key)
    }

    /// Run `f` on the row in place. `None` if the row does not exist.
    pub(crate) fn update<R>(&self, key: K, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.rows.get_mut(&key).map(|mut r| f(r.value_mut()))
    }

    pub(crate) fn remove(&self, key: K) -> Option<T> {
        self.rows.remove(&key).map(|(_, v)| v)
    }

    pub(crate) fn find(&self, pred: impl Fn(&T) -> bool) -> Option<T> {
        self.filter(pred).into_iter().next()
    }

    /// Matching rows in ascending key order.
    pub(crate) fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        let mut rows: Vec<(K, T)> = self
            .rows
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| (*r.key(), r.value().clone()))
            .collect();
        rows.sort_by_key(|(k, _)| *k);
        rows.into_iter().map(|(_, v)| v).collect()
    }

    pub(crate) fn values(&self) -> Vec<T> {
        self.filter(|_| true)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::RuleId;

    #[test]
    fn ids_continue_after_explicit_inserts() {
        let table: Table<RuleId, &str> = Table::new();
        assert!(table.insert_new(RuleId(10), "a"));
        assert!(!table.insert_new(RuleId(10), "b"));
        assert_eq!(table.get(RuleId(10)), Some("a"));
        assert_eq!(table.next_id(), RuleId(11));
    }

    #[test]
    fn listings_are_key_ordered() {
        let table: Table<RuleId, u64> = Table::new();
        for k in [5, 1, 3] {
            table.insert_new(RuleId(k), k * 10);
        }
        assert_eq!(table.values(), vec![10, 30, 50]);
        assert_eq!(table.filter(|v| *v > 10), vec![30, 50]);
        assert_eq!(table.update(RuleId(3), |v| {
            *v += 1;
            *v
        }), Some(31));
        assert_eq!(table.remove(RuleId(1)), Some(10));
        assert_eq!(table.len(), 2);
    }
}
