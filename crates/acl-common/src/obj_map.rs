//! Ordered object map with explicit reference counting.
//!
//! Control-plane objects live in id-keyed maps and are iterated in id
//! order (get-first/get-next walks). `ObjMap` wraps `BTreeMap` and adds
//! refcount helpers that never auto-create entries, so a typo'd key shows
//! up as an error instead of a phantom object with a dangling count.

use std::collections::BTreeMap;
use thiserror::Error;

/// Error type for ObjMap operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ObjMapError {
    #[error("Key not found")]
    KeyNotFound,

    #[error("Reference count underflow")]
    RefCountUnderflow,
}

/// Objects that track how many other objects refer to them.
pub trait RefCounted {
    /// Increments the reference count and returns the new value.
    fn increment_ref(&mut self) -> u32;

    /// Decrements the reference count and returns the new value, or
    /// `None` if the count would underflow.
    fn decrement_ref(&mut self) -> Option<u32>;

    /// Returns the current reference count.
    fn ref_count(&self) -> u32;

    /// Returns true if nothing refers to this object.
    fn is_unused(&self) -> bool {
        self.ref_count() == 0
    }
}

/// An id-ordered map that never creates entries implicitly.
#[derive(Debug, Clone)]
pub struct ObjMap<K, V> {
    inner: BTreeMap<K, V>,
}

impl<K, V> ObjMap<K, V>
where
    K: Ord,
{
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
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
        self.inner.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key)
    }

    /// First entry in key order.
    pub fn first(&self) -> Option<(&K, &V)> {
        self.inner.iter().next()
    }

    /// First entry with a key strictly greater than `key`.
    pub fn next_after(&self, key: &K) -> Option<(&K, &V)> {
        use std::ops::Bound;
        self.inner
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.inner.values_mut()
    }
}

impl<K, V> ObjMap<K, V>
where
    K: Ord,
    V: RefCounted,
{
    /// Increments the reference count for an existing key.
    pub fn increment_ref(&mut self, key: &K) -> Result<u32, ObjMapError> {
        match self.inner.get_mut(key) {
            Some(obj) => Ok(obj.increment_ref()),
            None => Err(ObjMapError::KeyNotFound),
        }
    }

    /// Decrements the reference count for an existing key.
    pub fn decrement_ref(&mut self, key: &K) -> Result<u32, ObjMapError> {
        match self.inner.get_mut(key) {
            Some(obj) => obj.decrement_ref().ok_or(ObjMapError::RefCountUnderflow),
            None => Err(ObjMapError::KeyNotFound),
        }
    }

    pub fn ref_count(&self, key: &K) -> Option<u32> {
        self.inner.get(key).map(|obj| obj.ref_count())
    }
}

impl<K, V> Default for ObjMap<K, V>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for ObjMap<K, V>
where
    K: Ord,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counted {
        refs: u32,
    }

    impl RefCounted for Counted {
        fn increment_ref(&mut self) -> u32 {
            self.refs += 1;
            self.refs
        }

        fn decrement_ref(&mut self) -> Option<u32> {
            self.refs.checked_sub(1).inspect(|&n| self.refs = n)
        }

        fn ref_count(&self) -> u32 {
            self.refs
        }
    }

    #[test]
    fn test_ordered_walk() {
        let mut map: ObjMap<u64, &str> = ObjMap::new();
        map.insert(30, "c");
        map.insert(10, "a");
        map.insert(20, "b");

        assert_eq!(map.first(), Some((&10, &"a")));
        assert_eq!(map.next_after(&10), Some((&20, &"b")));
        assert_eq!(map.next_after(&20), Some((&30, &"c")));
        assert_eq!(map.next_after(&30), None);
        // next_after works from a key that is not present
        assert_eq!(map.next_after(&15), Some((&20, &"b")));
    }

    #[test]
    fn test_refcount_requires_existing_key() {
        let mut map: ObjMap<u64, Counted> = ObjMap::new();
        assert_eq!(map.increment_ref(&1), Err(ObjMapError::KeyNotFound));

        map.insert(1, Counted { refs: 0 });
        assert_eq!(map.increment_ref(&1).unwrap(), 1);
        assert_eq!(map.decrement_ref(&1).unwrap(), 0);
        assert_eq!(map.decrement_ref(&1), Err(ObjMapError::RefCountUnderflow));
    }

    #[test]
    fn test_is_unused() {
        let mut obj = Counted { refs: 0 };
        assert!(obj.is_unused());
        obj.increment_ref();
        assert!(!obj.is_unused());
    }
}
