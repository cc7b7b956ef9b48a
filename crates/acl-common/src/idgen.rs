//! Identifier pools and the allocation guard.
//!
//! Every object class on a switch draws its identifiers from a bounded
//! pool. Creation flows allocate an id up front, program hardware, and
//! only then publish the object; the [`IdGuard`] returns the id to the
//! pool automatically if the flow aborts before [`IdGuard::unguard`] is
//! called.

use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Error type for identifier pool operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Id pool '{0}' exhausted")]
    Exhausted(&'static str),

    #[error("Id {1} is outside pool '{0}' (max {2})")]
    OutOfRange(&'static str, u64, u64),

    #[error("Id {1} already in use in pool '{0}'")]
    InUse(&'static str, u64),
}

struct IdPool {
    /// One bit per id; id N maps to bit N-1.
    bitmap: Vec<u64>,
    max_id: u64,
    /// Word index to start the next free-bit scan at.
    hint: usize,
}

impl IdPool {
    fn bit(id: u64) -> (usize, u64) {
        let idx = (id - 1) as usize;
        (idx / 64, 1u64 << (idx % 64))
    }

    fn is_set(&self, id: u64) -> bool {
        let (word, mask) = Self::bit(id);
        self.bitmap[word] & mask != 0
    }

    fn set(&mut self, id: u64) {
        let (word, mask) = Self::bit(id);
        self.bitmap[word] |= mask;
    }

    fn clear(&mut self, id: u64) {
        let (word, mask) = Self::bit(id);
        self.bitmap[word] &= !mask;
        self.hint = self.hint.min(word);
    }

    fn alloc(&mut self) -> Option<u64> {
        let words = self.bitmap.len();
        for word in self.hint..words {
            if self.bitmap[word] != u64::MAX {
                let bit = self.bitmap[word].trailing_ones() as u64;
                let id = word as u64 * 64 + bit + 1;
                if id > self.max_id {
                    return None;
                }
                self.bitmap[word] |= 1u64 << bit;
                self.hint = word;
                return Some(id);
            }
        }
        None
    }
}

/// A bounded pool of identifiers in `1..=max_id`.
///
/// Cloning produces another handle onto the same pool, which is what lets
/// [`IdGuard`] release ids independently of the structure that owns the
/// generator.
#[derive(Clone)]
pub struct IdGenerator {
    name: &'static str,
    pool: Arc<Mutex<IdPool>>,
}

impl IdGenerator {
    pub fn new(name: &'static str, max_id: u64) -> Self {
        let words = (max_id as usize).div_ceil(64);
        Self {
            name,
            pool: Arc::new(Mutex::new(IdPool {
                bitmap: vec![0; words],
                max_id,
                hint: 0,
            })),
        }
    }

    /// Allocates the lowest free id.
    pub fn alloc(&self) -> Result<u64, IdError> {
        let mut pool = self.lock();
        pool.alloc().ok_or(IdError::Exhausted(self.name))
    }

    /// Claims a specific id, failing if it is out of range or taken.
    pub fn reserve(&self, id: u64) -> Result<(), IdError> {
        let mut pool = self.lock();
        if id == 0 || id > pool.max_id {
            return Err(IdError::OutOfRange(self.name, id, pool.max_id));
        }
        if pool.is_set(id) {
            return Err(IdError::InUse(self.name, id));
        }
        pool.set(id);
        Ok(())
    }

    /// Returns an id to the pool. Releasing a free id is a no-op.
    pub fn release(&self, id: u64) {
        let mut pool = self.lock();
        if id != 0 && id <= pool.max_id {
            pool.clear(id);
        }
    }

    /// Returns true if the id is currently allocated.
    pub fn in_use(&self, id: u64) -> bool {
        let pool = self.lock();
        id != 0 && id <= pool.max_id && pool.is_set(id)
    }

    /// Allocates the lowest free id under guard.
    pub fn guard_alloc(&self) -> Result<IdGuard, IdError> {
        let id = self.alloc()?;
        Ok(IdGuard {
            gen: self.clone(),
            id,
            armed: true,
        })
    }

    /// Claims a specific id under guard.
    pub fn guard_reserve(&self, id: u64) -> Result<IdGuard, IdError> {
        self.reserve(id)?;
        Ok(IdGuard {
            gen: self.clone(),
            id,
            armed: true,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IdPool> {
        // Id pool state cannot be left inconsistent by a panicking holder;
        // recover the guard rather than poisoning every later caller.
        match self.pool.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.lock();
        f.debug_struct("IdGenerator")
            .field("name", &self.name)
            .field("max_id", &pool.max_id)
            .finish()
    }
}

/// RAII holder for a provisionally-allocated id.
///
/// Dropping the guard returns the id to its pool. Call [`unguard`] once
/// the object using the id has been fully published; after that the id
/// stays allocated until explicitly released.
///
/// [`unguard`]: IdGuard::unguard
#[derive(Debug)]
pub struct IdGuard {
    gen: IdGenerator,
    id: u64,
    armed: bool,
}

impl IdGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Commits the allocation and returns the id. The pool keeps the id
    /// allocated; it will not be released on drop.
    pub fn unguard(mut self) -> u64 {
        self.armed = false;
        self.id
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        if self.armed {
            self.gen.release(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_sequential() {
        let gen = IdGenerator::new("test", 100);
        assert_eq!(gen.alloc().unwrap(), 1);
        assert_eq!(gen.alloc().unwrap(), 2);
        assert_eq!(gen.alloc().unwrap(), 3);
    }

    #[test]
    fn test_alloc_reuses_released() {
        let gen = IdGenerator::new("test", 100);
        let a = gen.alloc().unwrap();
        let _b = gen.alloc().unwrap();
        gen.release(a);
        assert_eq!(gen.alloc().unwrap(), a);
    }

    #[test]
    fn test_exhaustion() {
        let gen = IdGenerator::new("tiny", 2);
        gen.alloc().unwrap();
        gen.alloc().unwrap();
        assert_eq!(gen.alloc(), Err(IdError::Exhausted("tiny")));
        gen.release(2);
        assert_eq!(gen.alloc().unwrap(), 2);
    }

    #[test]
    fn test_reserve() {
        let gen = IdGenerator::new("test", 100);
        gen.reserve(50).unwrap();
        assert!(gen.in_use(50));
        assert_eq!(gen.reserve(50), Err(IdError::InUse("test", 50)));
        assert_eq!(gen.reserve(0), Err(IdError::OutOfRange("test", 0, 100)));
        assert_eq!(gen.reserve(101), Err(IdError::OutOfRange("test", 101, 100)));
    }

    #[test]
    fn test_reserved_id_skipped_by_alloc() {
        let gen = IdGenerator::new("test", 100);
        gen.reserve(1).unwrap();
        gen.reserve(2).unwrap();
        assert_eq!(gen.alloc().unwrap(), 3);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let gen = IdGenerator::new("test", 100);
        {
            let guard = gen.guard_alloc().unwrap();
            assert_eq!(guard.id(), 1);
            assert!(gen.in_use(1));
        }
        assert!(!gen.in_use(1));
    }

    #[test]
    fn test_guard_unguard_commits() {
        let gen = IdGenerator::new("test", 100);
        let id = {
            let guard = gen.guard_reserve(7).unwrap();
            guard.unguard()
        };
        assert_eq!(id, 7);
        assert!(gen.in_use(7));
    }

    #[test]
    fn test_max_id_boundary() {
        let gen = IdGenerator::new("boundary", 65);
        for expect in 1..=65 {
            assert_eq!(gen.alloc().unwrap(), expect);
        }
        assert!(gen.alloc().is_err());
        gen.release(65);
        assert_eq!(gen.alloc().unwrap(), 65);
    }
}
