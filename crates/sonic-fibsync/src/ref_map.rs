//! Reference-counted map that never creates entries implicitly.
//!
//! Each slot pairs a value with the number of owners holding it. The only
//! ways to change a count are [`RefMap::insert_new`] (count 1),
//! [`RefMap::increment_ref`] and [`RefMap::release`]; a slot is removed
//! exactly when its count reaches zero, and the removed value is handed back
//! to the caller for teardown.

use std::collections::BTreeMap;
use std::fmt::Debug;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    refs: u32,
}

/// Outcome of dropping one reference.
#[derive(Debug, PartialEq, Eq)]
pub enum Released<V> {
    /// No entry under that key.
    Missing,
    /// Other owners remain; carries the remaining count.
    Retained(u32),
    /// That was the last reference; the caller now owns the value.
    Removed(V),
}

#[derive(Debug, Clone)]
pub struct RefMap<K, V> {
    inner: BTreeMap<K, Slot<V>>,
}

impl<K, V> Default for RefMap<K, V> {
    fn default() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }
}

impl<K, V> RefMap<K, V>
where
    K: Ord + Clone + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key).map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key).map(|slot| &mut slot.value)
    }

    pub fn ref_count(&self, key: &K) -> u32 {
        self.inner.get(key).map_or(0, |slot| slot.refs)
    }

    /// Adds one reference to an existing entry. **Never creates entries.**
    pub fn increment_ref(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key).map(|slot| {
            slot.refs += 1;
            &mut slot.value
        })
    }

    /// Inserts a freshly constructed value with a count of one.
    ///
    /// # Panics
    ///
    /// If `key` is already present; callers look up before constructing.
    pub fn insert_new(&mut self, key: K, value: V) -> &mut V {
        use std::collections::btree_map::Entry;
        match self.inner.entry(key) {
            Entry::Vacant(vacant) => &mut vacant.insert(Slot { value, refs: 1 }).value,
            Entry::Occupied(occupied) => {
                panic!("duplicate insert for {:?}", occupied.key())
            }
        }
    }

    /// Drops one reference.
    ///
    /// # Panics
    ///
    /// If the count is already zero.
    pub fn release(&mut self, key: &K) -> Released<V> {
        let Some(slot) = self.inner.get_mut(key) else {
            return Released::Missing;
        };
        assert!(slot.refs > 0, "reference count underflow for {:?}", key);
        slot.refs -= 1;
        if slot.refs > 0 {
            return Released::Retained(slot.refs);
        }
        match self.inner.remove(key) {
            Some(slot) => Released::Removed(slot.value),
            None => Released::Missing,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().map(|(k, slot)| (k, &slot.value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values().map(|slot| &slot.value)
    }
}
