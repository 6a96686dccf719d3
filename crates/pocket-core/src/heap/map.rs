//! map.rs — open-addressed hash table of `(key, value)` entries (§3.3 Map,
//! §4.2 "Map find").
//!
//! Empty slot ⇔ `key == Undefined ∧ value == Bool(false)`.
//! Tombstone  ⇔ `key == Undefined ∧ value == Bool(true)`.
//! Load factor ≤ 75%, grow ×2, shrink when `count*100/75 < cap/4`
//! (respecting the minimum capacity — intentionally conservative, §9:
//! "preserve").

use crate::error::ObjError;
use crate::heap::Heap;
use crate::value::Value;

const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Slot {
    key: Value,
    value: Value,
}

impl Slot {
    fn empty() -> Self {
        Self {
            key: Value::Undefined,
            value: Value::Bool(false),
        }
    }
    fn tombstone() -> Self {
        Self {
            key: Value::Undefined,
            value: Value::Bool(true),
        }
    }
    fn is_empty(&self) -> bool {
        matches!(self.key, Value::Undefined) && matches!(self.value, Value::Bool(false))
    }
    fn is_tombstone(&self) -> bool {
        matches!(self.key, Value::Undefined) && matches!(self.value, Value::Bool(true))
    }
    fn is_live(&self) -> bool {
        !self.is_empty() && !self.is_tombstone()
    }
}

/// A PocketLang map.
#[derive(Debug, Clone)]
pub struct PkMap {
    slots: Vec<Slot>,
    /// Live entries (insertion-hash-bucket order is not guaranteed stable
    /// across resizes, per §3.3).
    pub count: usize,
    tombstones: usize,
}

impl Default for PkMap {
    fn default() -> Self {
        Self::new()
    }
}

enum Probe {
    Found(usize),
    /// Insert here: either the first empty slot found, or the earliest
    /// tombstone seen before it.
    Insert(usize),
}

impl PkMap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            count: 0,
            tombstones: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn probe(&self, key: &Value, hash: u64, heap: &Heap) -> Probe {
        let cap = self.slots.len();
        debug_assert!(cap > 0);
        let mut first_tombstone: Option<usize> = None;
        let start = (hash as usize) % cap;
        for step in 0..cap {
            let i = (start + step) % cap;
            let slot = &self.slots[i];
            if slot.is_empty() {
                return Probe::Insert(first_tombstone.unwrap_or(i));
            }
            if slot.is_tombstone() {
                if first_tombstone.is_none() {
                    first_tombstone = Some(i);
                }
                continue;
            }
            if Value::equal(&slot.key, key, heap) {
                return Probe::Found(i);
            }
        }
        // Full wraparound with only tombstones (or a full table, which the
        // load-factor policy should prevent): insert at the first one.
        Probe::Insert(first_tombstone.unwrap_or(0))
    }

    fn grow_to(&mut self, new_cap: usize, heap: &Heap) {
        let old = std::mem::replace(&mut self.slots, vec![Slot::empty(); new_cap]);
        self.count = 0;
        self.tombstones = 0;
        for slot in old {
            if slot.is_live() {
                self.raw_insert(slot.key, slot.value, heap);
            }
        }
    }

    fn raw_insert(&mut self, key: Value, value: Value, heap: &Heap) {
        let hash = key.hash(heap).expect("key already validated hashable");
        match self.probe(&key, hash, heap) {
            Probe::Found(i) => self.slots[i].value = value,
            Probe::Insert(i) => {
                self.slots[i] = Slot { key, value };
                self.count += 1;
            }
        }
    }

    fn ensure_capacity_for_insert(&mut self, heap: &Heap) {
        if self.slots.is_empty() {
            self.slots = vec![Slot::empty(); MIN_CAPACITY];
            return;
        }
        let occupied = self.count + self.tombstones + 1;
        if occupied * 100 > self.slots.len() * 75 {
            let new_cap = self.slots.len() * 2;
            self.grow_to(new_cap, heap);
        }
    }

    /// Insert or update. Errors if `key` is unhashable (§3.3).
    pub fn insert(&mut self, key: Value, value: Value, heap: &Heap) -> Result<(), ObjError> {
        key.hash(heap).map_err(|_| ObjError::UnhashableKey)?;
        self.ensure_capacity_for_insert(heap);
        let hash = key.hash(heap).map_err(|_| ObjError::UnhashableKey)?;
        match self.probe(&key, hash, heap) {
            Probe::Found(i) => self.slots[i].value = value,
            Probe::Insert(i) => {
                let was_tombstone = self.slots[i].is_tombstone();
                self.slots[i] = Slot { key, value };
                self.count += 1;
                if was_tombstone {
                    self.tombstones -= 1;
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &Value, heap: &Heap) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let hash = key.hash(heap).ok()?;
        match self.probe(key, hash, heap) {
            Probe::Found(i) => Some(self.slots[i].value),
            Probe::Insert(_) => None,
        }
    }

    /// Remove a key, turning its slot into a tombstone. Returns the
    /// removed value, if any.
    pub fn remove(&mut self, key: &Value, heap: &Heap) -> Option<Value> {
        if self.slots.is_empty() {
            return None;
        }
        let hash = key.hash(heap).ok()?;
        match self.probe(key, hash, heap) {
            Probe::Found(i) => {
                let value = self.slots[i].value;
                self.slots[i] = Slot::tombstone();
                self.count -= 1;
                self.tombstones += 1;
                self.maybe_shrink(heap);
                Some(value)
            }
            Probe::Insert(_) => None,
        }
    }

    fn maybe_shrink(&mut self, heap: &Heap) {
        let cap = self.slots.len();
        if cap <= MIN_CAPACITY {
            return;
        }
        if self.count * 100 / 75 < cap / 4 {
            let new_cap = (cap / 2).max(MIN_CAPACITY);
            self.grow_to(new_cap, heap);
        }
    }

    /// Live entries in slot order (insertion-hash-bucket order; not stable
    /// across resizes).
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.slots
            .iter()
            .filter(|s| s.is_live())
            .map(|s| (s.key, s.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_roundtrips() {
        let heap = Heap::new();
        let mut m = PkMap::new();
        m.insert(Value::Num(1.0), Value::Num(42.0), &heap).unwrap();
        let got = m.get(&Value::Num(1.0), &heap).unwrap();
        assert!(matches!(got, Value::Num(n) if n == 42.0));
    }

    #[test]
    fn delete_then_get_is_none() {
        let heap = Heap::new();
        let mut m = PkMap::new();
        m.insert(Value::Num(1.0), Value::Num(42.0), &heap).unwrap();
        m.remove(&Value::Num(1.0), &heap);
        assert!(m.get(&Value::Num(1.0), &heap).is_none());
        assert_eq!(m.len(), 0);
    }

    #[test]
    fn load_factor_triggers_growth() {
        let heap = Heap::new();
        let mut m = PkMap::new();
        for i in 0..100 {
            m.insert(Value::Num(i as f64), Value::Num(i as f64), &heap)
                .unwrap();
        }
        assert_eq!(m.len(), 100);
        assert!(m.capacity() * 75 >= m.len() * 100);
        for i in 0..100 {
            let v = m.get(&Value::Num(i as f64), &heap).unwrap();
            assert!(matches!(v, Value::Num(n) if n == i as f64));
        }
    }

    #[test]
    fn tombstones_do_not_stop_probing() {
        let heap = Heap::new();
        let mut m = PkMap::new();
        for i in 0..6 {
            m.insert(Value::Num(i as f64), Value::Num(i as f64), &heap)
                .unwrap();
        }
        m.remove(&Value::Num(2.0), &heap);
        let v = m.get(&Value::Num(5.0), &heap);
        assert!(v.is_some());
    }

    proptest::proptest! {
        #[test]
        fn random_insert_delete_matches_a_reference_map(
            ops in proptest::collection::vec((proptest::bool::ANY, 0i64..24), 0..300)
        ) {
            let heap = Heap::new();
            let mut m = PkMap::new();
            let mut model: std::collections::HashMap<i64, f64> = std::collections::HashMap::new();
            for (step, (is_insert, key)) in ops.iter().enumerate() {
                if *is_insert {
                    let v = step as f64;
                    m.insert(Value::Num(*key as f64), Value::Num(v), &heap).unwrap();
                    model.insert(*key, v);
                } else {
                    m.remove(&Value::Num(*key as f64), &heap);
                    model.remove(key);
                }
            }
            proptest::prop_assert_eq!(m.len(), model.len());
            for (k, v) in &model {
                let got = m.get(&Value::Num(*k as f64), &heap).unwrap();
                proptest::prop_assert!(matches!(got, Value::Num(n) if n == *v));
            }
            let live: std::collections::HashMap<i64, f64> = m
                .iter()
                .map(|(k, v)| (k.as_num().unwrap() as i64, v.as_num().unwrap()))
                .collect();
            proptest::prop_assert_eq!(live.len(), model.len());
            for (k, v) in &model {
                proptest::prop_assert_eq!(live.get(k).copied(), Some(*v));
            }
            proptest::prop_assert!(m.capacity() == 0 || m.len() * 100 <= m.capacity() * 75);
        }
    }
}
