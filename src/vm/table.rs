//! Open-addressing hash table keyed by heap objects.
//!
//! Keys are compared by handle identity. Because every string key is
//! interned, identity is content equality for strings and lookups never
//! touch string contents. The one exception is [`Table::find_string`], which
//! the interning path uses before the candidate string exists as an object.
//!
//! Slots have three states:
//! - empty: no key, value `nil`; ends a probe sequence;
//! - tombstone: no key, value `true`; left by `delete`, probing continues;
//! - occupied: a key and its value.
//!
//! Load accounting: `count` includes tombstones. Filling an empty slot
//! increments it, reusing a tombstone does not, and `delete` never
//! decrements it. The table grows before an insert would push `count` past
//! 3/4 of capacity; growing re-probes live entries only, so it also discards
//! tombstones.

use std::mem;

use super::value::grow_capacity;
use super::{GcRef, Heap, Value};

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: Option<GcRef>,
    hash: u32,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Nil,
    };

    const TOMBSTONE: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Bool(true),
    };

    fn is_empty(&self) -> bool {
        self.key.is_none() && self.value.is_nil()
    }
}

/// Hash map from object keys to values.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Occupied slots plus tombstones.
    count: usize,
    /// Occupied slots only.
    len: usize,
}

/// Probe for `key`. Returns the slot holding it or, on a miss, the slot an
/// insert should use: the first tombstone passed, else the empty slot that
/// ended the probe.
fn find_entry(entries: &[Entry], key: GcRef, hash: u32) -> usize {
    let capacity = entries.len();
    let mut index = hash as usize % capacity;
    let mut tombstone = None;

    loop {
        let entry = &entries[index];
        match entry.key {
            None if entry.value.is_nil() => return tombstone.unwrap_or(index),
            None => {
                tombstone.get_or_insert(index);
            }
            Some(k) if k == key => return index,
            Some(_) => {}
        }
        index = (index + 1) % capacity;
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slots counted against the load factor (live keys plus tombstones).
    pub fn load(&self) -> usize {
        self.count
    }

    /// Bytes held by the backing array, for heap accounting.
    pub fn heap_size(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry>()
    }

    /// Bytes the next [`set`](Self::set) adds to the backing array, whether
    /// or not the key is already present.
    pub fn insert_growth(&self) -> usize {
        if self.needs_growth() {
            (grow_capacity(self.entries.len()) - self.entries.len()) * mem::size_of::<Entry>()
        } else {
            0
        }
    }

    fn needs_growth(&self) -> bool {
        (self.count + 1) * 4 > self.entries.len() * 3
    }

    pub fn get(&self, heap: &Heap, key: GcRef) -> Option<Value> {
        self.get_with_hash(key, heap.hash_of(key))
    }

    fn get_with_hash(&self, key: GcRef, hash: u32) -> Option<Value> {
        if self.count == 0 {
            return None;
        }
        let entry = &self.entries[find_entry(&self.entries, key, hash)];
        entry.key.map(|_| entry.value)
    }

    pub fn contains_key(&self, heap: &Heap, key: GcRef) -> bool {
        self.get(heap, key).is_some()
    }

    /// Insert or overwrite. Returns `true` if `key` was not present.
    pub fn set(&mut self, heap: &Heap, key: GcRef, value: Value) -> bool {
        self.insert(key, heap.hash_of(key), value)
    }

    fn insert(&mut self, key: GcRef, hash: u32, value: Value) -> bool {
        if self.needs_growth() {
            self.adjust_capacity(grow_capacity(self.entries.len()));
        }

        let index = find_entry(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_none();
        if is_new_key {
            if entry.is_empty() {
                self.count += 1;
            }
            self.len += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new_key
    }

    /// Remove `key`, leaving a tombstone. Returns `true` if it was present.
    pub fn delete(&mut self, heap: &Heap, key: GcRef) -> bool {
        self.delete_with_hash(key, heap.hash_of(key))
    }

    fn delete_with_hash(&mut self, key: GcRef, hash: u32) -> bool {
        if self.count == 0 {
            return false;
        }
        let index = find_entry(&self.entries, key, hash);
        if self.entries[index].key.is_none() {
            return false;
        }
        self.entries[index] = Entry::TOMBSTONE;
        self.len -= 1;
        true
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);
        self.count = 0;
        for entry in old {
            let Some(key) = entry.key else {
                continue;
            };
            let index = find_entry(&self.entries, key, entry.hash);
            self.entries[index] = entry;
            self.count += 1;
        }
        self.len = self.count;
    }

    /// Copy every entry of `self` into `to`.
    pub fn add_all(&self, to: &mut Table) {
        for entry in &self.entries {
            if let Some(key) = entry.key {
                to.insert(key, entry.hash, entry.value);
            }
        }
    }

    /// Look up an interned string by content.
    pub fn find_string(&self, heap: &Heap, chars: &str, hash: u32) -> Option<GcRef> {
        if self.count == 0 {
            return None;
        }
        let capacity = self.entries.len();
        let mut index = hash as usize % capacity;

        loop {
            let entry = &self.entries[index];
            match entry.key {
                None if entry.value.is_nil() => return None,
                None => {}
                Some(key) if entry.hash == hash => {
                    if heap.string(key).is_some_and(|s| s.as_str() == chars) {
                        return Some(key);
                    }
                }
                Some(_) => {}
            }
            index = (index + 1) % capacity;
        }
    }

    /// Delete every entry whose key was not marked in the current cycle.
    pub fn remove_white(&mut self, heap: &Heap) {
        let mut removed = 0;
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !heap.is_marked(key) {
                    *entry = Entry::TOMBSTONE;
                    removed += 1;
                }
            }
        }
        self.len -= removed;
    }

    /// Live `(key, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (GcRef, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.key.map(|key| (key, entry.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::{ObjFunction, ObjString, Object, hash_str};
    use std::collections::HashMap;

    fn intern(heap: &mut Heap, s: &str) -> GcRef {
        heap.insert(Object::String(ObjString::new(s)))
    }

    /// Two distinct keys whose hashes land in the same slot of an 8-slot table.
    fn colliding_pair(heap: &mut Heap) -> (GcRef, GcRef) {
        let mut seen: HashMap<u32, String> = HashMap::new();
        for i in 0.. {
            let s = format!("key{}", i);
            let bucket = hash_str(&s) % 8;
            if let Some(first) = seen.get(&bucket) {
                let first = first.clone();
                return (intern(heap, &first), intern(heap, &s));
            }
            seen.insert(bucket, s);
        }
        unreachable!()
    }

    #[test]
    fn test_empty_table() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "missing");
        let mut table = Table::new();
        assert_eq!(table.get(&heap, key), None);
        assert!(!table.delete(&heap, key));
        assert_eq!(table.capacity(), 0);
        assert_eq!(table.find_string(&heap, "missing", hash_str("missing")), None);
    }

    #[test]
    fn test_insert_growth_predicts_resize() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        for i in 0..50 {
            let key = intern(&mut heap, &format!("k{}", i));
            let predicted = table.insert_growth();
            let before = table.heap_size();
            table.set(&heap, key, Value::Nil);
            assert_eq!(table.heap_size() - before, predicted, "insert {}", i);
        }
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "x");
        let mut table = Table::new();

        assert!(table.set(&heap, key, Value::Number(1.0)));
        assert!(!table.set(&heap, key, Value::Number(2.0)));
        assert_eq!(table.get(&heap, key), Some(Value::Number(2.0)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.capacity(), 8);
    }

    #[test]
    fn test_delete_then_get_misses() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "x");
        let mut table = Table::new();
        table.set(&heap, key, Value::Nil);

        assert!(table.delete(&heap, key));
        assert_eq!(table.get(&heap, key), None);
        assert!(!table.delete(&heap, key));
        assert!(table.is_empty());
        assert_eq!(table.load(), 1, "tombstone still counts toward load");
    }

    #[test]
    fn test_tombstone_does_not_break_probe_chain() {
        let mut heap = Heap::new();
        let (k1, k2) = colliding_pair(&mut heap);
        let mut table = Table::new();

        table.set(&heap, k1, Value::Number(1.0));
        table.set(&heap, k2, Value::Number(2.0));
        table.delete(&heap, k1);

        assert_eq!(table.get(&heap, k2), Some(Value::Number(2.0)));
        assert_eq!(table.get(&heap, k1), None);
    }

    #[test]
    fn test_tombstone_reuse_does_not_grow_load() {
        let mut heap = Heap::new();
        let (k1, k2) = colliding_pair(&mut heap);
        let mut table = Table::new();

        table.set(&heap, k1, Value::Nil);
        table.set(&heap, k2, Value::Nil);
        table.delete(&heap, k1);
        assert_eq!(table.load(), 2);

        assert!(table.set(&heap, k1, Value::Bool(false)));
        assert_eq!(table.load(), 2);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&heap, k1), Some(Value::Bool(false)));
    }

    #[test]
    fn test_growth_drops_tombstones() {
        let mut heap = Heap::new();
        let keys: Vec<GcRef> = (0..6).map(|i| intern(&mut heap, &format!("k{}", i))).collect();
        let mut table = Table::new();
        for &k in &keys {
            table.set(&heap, k, Value::Nil);
        }
        for &k in &keys[..3] {
            table.delete(&heap, k);
        }
        assert_eq!(table.load(), 6);
        assert_eq!(table.capacity(), 8);

        let extra = intern(&mut heap, "extra");
        table.set(&heap, extra, Value::Nil);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.load(), 4);
        assert_eq!(table.len(), 4);
        for &k in &keys[3..] {
            assert!(table.contains_key(&heap, k));
        }
    }

    #[test]
    fn test_churn_matches_model() {
        let mut heap = Heap::new();
        let keys: Vec<GcRef> = (0..64).map(|i| intern(&mut heap, &format!("v{}", i))).collect();
        let mut table = Table::new();
        let mut model: HashMap<GcRef, f64> = HashMap::new();

        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for step in 0..5000 {
            seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let key = keys[(seed >> 33) as usize % keys.len()];
            if (seed >> 20) % 3 == 0 {
                assert_eq!(table.delete(&heap, key), model.remove(&key).is_some());
            } else {
                let is_new = table.set(&heap, key, Value::Number(step as f64));
                assert_eq!(is_new, model.insert(key, step as f64).is_none());
                assert!(table.load() * 4 <= table.capacity() * 3);
            }
            assert_eq!(table.len(), model.len());
        }

        for &key in &keys {
            assert_eq!(table.get(&heap, key), model.get(&key).map(|n| Value::Number(*n)));
        }
    }

    #[test]
    fn test_find_string_compares_content() {
        let mut heap = Heap::new();
        let key = intern(&mut heap, "hello");
        let mut table = Table::new();
        table.set(&heap, key, Value::Nil);

        assert_eq!(table.find_string(&heap, "hello", hash_str("hello")), Some(key));
        assert_eq!(table.find_string(&heap, "hellp", hash_str("hellp")), None);
        // Same hash but different content must not match.
        assert_eq!(table.find_string(&heap, "other", hash_str("hello")), None);
    }

    #[test]
    fn test_non_string_keys_hash_by_identity() {
        let mut heap = Heap::new();
        let f1 = heap.insert(Object::Function(ObjFunction::new()));
        let f2 = heap.insert(Object::Function(ObjFunction::new()));
        let mut table = Table::new();
        table.set(&heap, f1, Value::Number(1.0));
        table.set(&heap, f2, Value::Number(2.0));
        assert_eq!(table.get(&heap, f1), Some(Value::Number(1.0)));
        assert_eq!(table.get(&heap, f2), Some(Value::Number(2.0)));
    }

    #[test]
    fn test_add_all() {
        let mut heap = Heap::new();
        let a = intern(&mut heap, "a");
        let b = intern(&mut heap, "b");
        let mut from = Table::new();
        from.set(&heap, a, Value::Number(1.0));
        from.set(&heap, b, Value::Number(2.0));
        from.delete(&heap, b);

        let mut to = Table::new();
        to.set(&heap, b, Value::Nil);
        from.add_all(&mut to);
        assert_eq!(to.get(&heap, a), Some(Value::Number(1.0)));
        assert_eq!(to.get(&heap, b), Some(Value::Nil));
        assert_eq!(to.len(), 2);
    }

    #[test]
    fn test_remove_white() {
        let mut heap = Heap::new();
        let live = intern(&mut heap, "live");
        let dead = intern(&mut heap, "dead");
        let mut table = Table::new();
        table.set(&heap, live, Value::Nil);
        table.set(&heap, dead, Value::Nil);

        heap.mark_object(live);
        table.remove_white(&heap);

        assert!(table.contains_key(&heap, live));
        assert!(!table.contains_key(&heap, dead));
        assert_eq!(table.len(), 1);
    }
}
