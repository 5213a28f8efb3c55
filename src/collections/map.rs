// ABOUTME: Hash-array-mapped trie map: bitmap-indexed / array / collision node shapes (spec.md §3/§4.6).
// 5-bit indexing (32-way); hash spread h ^ (h >> 16); array promotion above 16 bitmap entries.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use super::capability::{Associative, Counted, Lookup};
use crate::error::RuntimeError;

const BITS: u32 = 5;
const WIDTH: usize = 1 << BITS;
const MASK: u32 = (WIDTH - 1) as u32;
const ARRAY_PROMOTE_THRESHOLD: usize = 16;

fn spread_hash<K: Hash>(key: &K) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let h = hasher.finish() as u32;
    h ^ (h >> 16)
}

enum Node<K, V> {
    Leaf {
        hash: u32,
        key: K,
        value: V,
    },
    Collision {
        hash: u32,
        entries: Vec<(K, V)>,
    },
    Bitmap {
        bitmap: u32,
        children: Vec<Rc<Node<K, V>>>,
    },
    Array {
        children: Vec<Option<Rc<Node<K, V>>>>,
    },
}

impl<K: Clone + PartialEq, V: Clone> Node<K, V> {
    fn leaf(hash: u32, key: K, value: V) -> Rc<Self> {
        Rc::new(Node::Leaf { hash, key, value })
    }

    fn get(&self, hash: u32, shift: u32, key: &K) -> Option<&V> {
        match self {
            Node::Leaf { hash: h, key: k, value } => {
                if *h == hash && k == key {
                    Some(value)
                } else {
                    None
                }
            }
            Node::Collision { hash: h, entries } => {
                if *h == hash {
                    entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
                } else {
                    None
                }
            }
            Node::Bitmap { bitmap, children } => {
                let bit = 1u32 << ((hash >> shift) & MASK);
                if bitmap & bit == 0 {
                    None
                } else {
                    let idx = (bitmap & (bit - 1)).count_ones() as usize;
                    children[idx].get(hash, shift + BITS, key)
                }
            }
            Node::Array { children } => {
                let idx = ((hash >> shift) & MASK) as usize;
                children[idx].as_ref().and_then(|c| c.get(hash, shift + BITS, key))
            }
        }
    }

    fn merge_with_new(existing: Rc<Node<K, V>>, existing_hash: u32, shift: u32, new_hash: u32, new_key: K, new_value: V) -> Rc<Node<K, V>> {
        if shift >= 32 {
            // Every bit of the 32-bit hash has been consumed across levels
            // without the two hashes ever diverging, which is only possible
            // if they were equal all along — callers never reach this path.
            unreachable!("32-bit hash exhausted without divergence");
        }
        let bit_existing = (existing_hash >> shift) & MASK;
        let bit_new = (new_hash >> shift) & MASK;
        if bit_existing == bit_new {
            let child = Self::merge_with_new(existing, existing_hash, shift + BITS, new_hash, new_key, new_value);
            Rc::new(Node::Bitmap {
                bitmap: 1 << bit_existing,
                children: vec![child],
            })
        } else {
            let new_leaf = Node::leaf(new_hash, new_key, new_value);
            let (children, bitmap) = if bit_existing < bit_new {
                (vec![existing, new_leaf], (1 << bit_existing) | (1 << bit_new))
            } else {
                (vec![new_leaf, existing], (1 << bit_existing) | (1 << bit_new))
            };
            Rc::new(Node::Bitmap { bitmap, children })
        }
    }

    fn promote_if_needed(bitmap: u32, children: Vec<Rc<Node<K, V>>>) -> Rc<Node<K, V>> {
        if children.len() <= ARRAY_PROMOTE_THRESHOLD {
            return Rc::new(Node::Bitmap { bitmap, children });
        }
        let mut array: Vec<Option<Rc<Node<K, V>>>> = vec![None; WIDTH];
        let mut remaining = bitmap;
        let mut i = 0;
        while remaining != 0 {
            let bit_index = remaining.trailing_zeros() as usize;
            array[bit_index] = Some(Rc::clone(&children[i]));
            remaining &= remaining - 1;
            i += 1;
        }
        Rc::new(Node::Array { children: array })
    }

    /// Returns `(new_node, was_newly_added)`.
    fn assoc(node: Option<&Rc<Node<K, V>>>, hash: u32, shift: u32, key: K, value: V) -> (Rc<Node<K, V>>, bool) {
        let Some(n) = node else {
            return (Node::leaf(hash, key, value), true);
        };
        match n.as_ref() {
            Node::Leaf { hash: h, key: k, value: v } => {
                if *h == hash {
                    if *k == key {
                        (Node::leaf(hash, key, value), false)
                    } else {
                        (
                            Rc::new(Node::Collision {
                                hash,
                                entries: vec![(k.clone(), v.clone()), (key, value)],
                            }),
                            true,
                        )
                    }
                } else {
                    (
                        Self::merge_with_new(Rc::clone(n), *h, shift, hash, key, value),
                        true,
                    )
                }
            }
            Node::Collision { hash: h, entries } => {
                if *h == hash {
                    let mut new_entries = entries.clone();
                    if let Some(pos) = new_entries.iter().position(|(k, _)| *k == key) {
                        new_entries[pos] = (key, value);
                        (Rc::new(Node::Collision { hash, entries: new_entries }), false)
                    } else {
                        new_entries.push((key, value));
                        (Rc::new(Node::Collision { hash, entries: new_entries }), true)
                    }
                } else {
                    (
                        Self::merge_with_new(Rc::clone(n), *h, shift, hash, key, value),
                        true,
                    )
                }
            }
            Node::Bitmap { bitmap, children } => {
                let bit = 1u32 << ((hash >> shift) & MASK);
                let idx = (bitmap & (bit - 1)).count_ones() as usize;
                if bitmap & bit == 0 {
                    let mut new_children = children.clone();
                    new_children.insert(idx, Node::leaf(hash, key, value));
                    (Self::promote_if_needed(bitmap | bit, new_children), true)
                } else {
                    let (new_child, added) = Self::assoc(Some(&children[idx]), hash, shift + BITS, key, value);
                    let mut new_children = children.clone();
                    new_children[idx] = new_child;
                    (Rc::new(Node::Bitmap { bitmap: *bitmap, children: new_children }), added)
                }
            }
            Node::Array { children } => {
                let idx = ((hash >> shift) & MASK) as usize;
                let mut new_children = children.clone();
                let (new_child, added) = match &children[idx] {
                    None => (Node::leaf(hash, key, value), true),
                    Some(child) => Self::assoc(Some(child), hash, shift + BITS, key, value),
                };
                new_children[idx] = Some(new_child);
                (Rc::new(Node::Array { children: new_children }), added)
            }
        }
    }

    /// Returns `(new_node_or_none, was_removed)`.
    fn dissoc(node: &Rc<Node<K, V>>, hash: u32, shift: u32, key: &K) -> (Option<Rc<Node<K, V>>>, bool) {
        match node.as_ref() {
            Node::Leaf { hash: h, key: k, .. } => {
                if *h == hash && k == key {
                    (None, true)
                } else {
                    (Some(Rc::clone(node)), false)
                }
            }
            Node::Collision { hash: h, entries } => {
                if *h != hash {
                    return (Some(Rc::clone(node)), false);
                }
                let mut new_entries = entries.clone();
                let before = new_entries.len();
                new_entries.retain(|(k, _)| k != key);
                let removed = new_entries.len() != before;
                if new_entries.len() == 1 {
                    let (k, v) = new_entries.into_iter().next().unwrap();
                    (Some(Node::leaf(hash, k, v)), removed)
                } else if new_entries.is_empty() {
                    (None, removed)
                } else {
                    (Some(Rc::new(Node::Collision { hash, entries: new_entries })), removed)
                }
            }
            Node::Bitmap { bitmap, children } => {
                let bit = 1u32 << ((hash >> shift) & MASK);
                if bitmap & bit == 0 {
                    return (Some(Rc::clone(node)), false);
                }
                let idx = (bitmap & (bit - 1)).count_ones() as usize;
                let (new_child, removed) = Self::dissoc(&children[idx], hash, shift + BITS, key);
                let mut new_children = children.clone();
                match new_child {
                    Some(c) => {
                        new_children[idx] = c;
                        (Some(Rc::new(Node::Bitmap { bitmap: *bitmap, children: new_children })), removed)
                    }
                    None => {
                        new_children.remove(idx);
                        let new_bitmap = bitmap & !bit;
                        if new_children.is_empty() {
                            (None, removed)
                        } else {
                            (Some(Rc::new(Node::Bitmap { bitmap: new_bitmap, children: new_children })), removed)
                        }
                    }
                }
            }
            Node::Array { children } => {
                let idx = ((hash >> shift) & MASK) as usize;
                match &children[idx] {
                    None => (Some(Rc::clone(node)), false),
                    Some(child) => {
                        let (new_child, removed) = Self::dissoc(child, hash, shift + BITS, key);
                        let mut new_children = children.clone();
                        new_children[idx] = new_child;
                        if new_children.iter().all(Option::is_none) {
                            (None, removed)
                        } else {
                            (Some(Rc::new(Node::Array { children: new_children })), removed)
                        }
                    }
                }
            }
        }
    }

    fn for_each<'a>(&'a self, f: &mut dyn FnMut(&'a K, &'a V)) {
        match self {
            Node::Leaf { key, value, .. } => f(key, value),
            Node::Collision { entries, .. } => entries.iter().for_each(|(k, v)| f(k, v)),
            Node::Bitmap { children, .. } => children.iter().for_each(|c| c.for_each(f)),
            Node::Array { children, .. } => children.iter().flatten().for_each(|c| c.for_each(f)),
        }
    }
}

/// Immutable HAMT map. Equal values at equal keys are structurally equal
/// (spec.md §8); `Hash`/`PartialEq` are left to callers that need map keys
/// built from `PersistentMap` (the map's own key hashing uses `DefaultHasher`
/// over `K: Hash` regardless).
#[derive(Clone)]
pub struct PersistentMap<K, V> {
    root: Option<Rc<Node<K, V>>>,
    count: usize,
}

impl<K: Clone + PartialEq + Hash, V: Clone> PersistentMap<K, V> {
    pub fn new() -> Self {
        PersistentMap { root: None, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = spread_hash(key);
        self.root.as_ref().and_then(|n| n.get(hash, 0, key))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// `assoc(k,v)`: `get(k)==v`, all other keys preserved (spec.md §8).
    pub fn assoc(&self, key: K, value: V) -> Self {
        let hash = spread_hash(&key);
        let (new_root, added) = Node::assoc(self.root.as_ref(), hash, 0, key, value);
        PersistentMap {
            root: Some(new_root),
            count: if added { self.count + 1 } else { self.count },
        }
    }

    /// `dissoc`: removes the key; removing the sole key yields empty (spec.md §4.6).
    pub fn dissoc(&self, key: &K) -> Self {
        let hash = spread_hash(key);
        match &self.root {
            None => self.clone(),
            Some(root) => {
                let (new_root, removed) = Node::dissoc(root, hash, 0, key);
                PersistentMap {
                    root: new_root,
                    count: if removed { self.count - 1 } else { self.count },
                }
            }
        }
    }

    pub fn for_each<'a>(&'a self, mut f: impl FnMut(&'a K, &'a V)) {
        if let Some(root) = &self.root {
            root.for_each(&mut f);
        }
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.count);
        self.for_each(|k, v| out.push((k.clone(), v.clone())));
        out
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, RuntimeError> {
        let mut m = Self::new();
        for (k, v) in pairs {
            m = m.assoc(k, v);
        }
        Ok(m)
    }
}

impl<K: Clone + PartialEq + Hash, V: Clone> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + PartialEq + Hash, V: Clone + PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.count != other.count {
            return false;
        }
        let mut equal = self.count == other.count;
        self.for_each(|k, v| {
            if other.get(k) != Some(v) {
                equal = false;
            }
        });
        equal
    }
}

impl<K: Clone + PartialEq + Hash, V: Clone> Counted for PersistentMap<K, V> {
    fn count(&self) -> usize {
        self.count
    }
}

impl<K: Clone + PartialEq + Hash, V: Clone> Associative<K, V> for PersistentMap<K, V> {
    fn assoc(&self, key: K, value: V) -> Self {
        self.assoc(key, value)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.contains_key(key)
    }
}

impl<K: Clone + PartialEq + Hash, V: Clone> Lookup<K, V> for PersistentMap<K, V> {
    fn lookup(&self, key: &K, not_found: V) -> V {
        self.get(key).cloned().unwrap_or(not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assoc_get_law() {
        let m: PersistentMap<String, i64> = PersistentMap::new();
        let m = m.assoc("a".to_string(), 1);
        assert_eq!(m.get(&"a".to_string()), Some(&1));
    }

    #[test]
    fn assoc_preserves_other_keys() {
        let m: PersistentMap<String, i64> = PersistentMap::new();
        let m = m.assoc("a".to_string(), 1).assoc("b".to_string(), 2);
        let m2 = m.assoc("a".to_string(), 99);
        assert_eq!(m2.get(&"b".to_string()), Some(&2));
        assert_eq!(m.get(&"a".to_string()), Some(&1), "original map unaffected");
    }

    #[test]
    fn dissoc_sole_key_returns_empty() {
        let m: PersistentMap<String, i64> = PersistentMap::new().assoc("only".to_string(), 1);
        let m2 = m.dissoc(&"only".to_string());
        assert!(m2.is_empty());
        assert!(!m2.contains_key(&"only".to_string()));
    }

    #[test]
    fn many_keys_round_trip() {
        let mut m: PersistentMap<i64, i64> = PersistentMap::new();
        for i in 0..2000 {
            m = m.assoc(i, i * 2);
        }
        assert_eq!(m.count(), 2000);
        for i in 0..2000 {
            assert_eq!(m.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn structural_equality() {
        let a = PersistentMap::new().assoc("x".to_string(), 1).assoc("y".to_string(), 2);
        let b = PersistentMap::new().assoc("y".to_string(), 2).assoc("x".to_string(), 1);
        assert_eq!(a, b);
    }
}
