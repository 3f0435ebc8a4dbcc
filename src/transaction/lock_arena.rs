//! Block-pooled arenas for resource and entry records (C3).
//!
//! Resources and entries reference each other and their owning transaction
//! through back-pointers; rather than `Rc`/`Weak` cycles or raw pointers,
//! both live in an arena and are referenced by an opaque index (§9, Design
//! Notes: "arena-of-entries + arena-of-resources with opaque indices").
//!
//! Each arena is additionally a *block pool*: instead of growing one slot at
//! a time, it grows in blocks of `block_size` and serves allocations from a
//! free list. When the free list is empty a caller sleeps briefly and
//! retries (`sleep_max_count`, see [`super::lock_config`]) before the pool
//! is allowed to grow, which keeps allocation off the hot path under normal
//! load while still making progress under sustained pressure.

use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::transaction::error::TransactionError;

const RETRY_SLEEP: Duration = Duration::from_millis(10);

/// Opaque index into an [`Arena`]. Never aliases a slot after it has been
/// removed until that slot is reused — `generation` guards against stale
/// indices from a previous occupant being mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaIdx {
    slot: u32,
    generation: u32,
}

impl ArenaIdx {
    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self { slot: 0, generation: 0 }
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Free { next: Option<u32>, generation: u32 },
}

/// A growable arena of `T`, indexed by [`ArenaIdx`].
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Splice `count` fresh free slots onto the arena.
    fn grow(&mut self, count: usize) {
        let start = self.slots.len();
        for i in 0..count {
            let next = if i + 1 < count {
                Some((start + i + 1) as u32)
            } else {
                self.free_head
            };
            self.slots.push(Slot::Free { next, generation: 0 });
        }
        self.free_head = Some(start as u32);
    }

    /// Attempt to claim a free slot for `value`. Returns the value back
    /// (via `Err`) if the free list is currently empty, so callers can
    /// retry without losing it.
    fn try_insert(&mut self, value: T) -> Result<ArenaIdx, T> {
        let Some(idx) = self.free_head else {
            return Err(value);
        };
        let (next, generation) = match &self.slots[idx as usize] {
            Slot::Free { next, generation } => (*next, *generation),
            Slot::Occupied { .. } => unreachable!("free list points at occupied slot"),
        };
        self.free_head = next;
        self.slots[idx as usize] = Slot::Occupied { value, generation };
        self.len += 1;
        Ok(ArenaIdx { slot: idx, generation })
    }

    fn remove(&mut self, idx: ArenaIdx) -> Option<T> {
        match self.slots.get_mut(idx.slot as usize)? {
            Slot::Occupied { generation, .. } if *generation == idx.generation => {}
            _ => return None,
        }
        let old = std::mem::replace(
            &mut self.slots[idx.slot as usize],
            Slot::Free {
                next: self.free_head,
                generation: idx.generation.wrapping_add(1),
            },
        );
        self.free_head = Some(idx.slot);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, idx: ArenaIdx) -> Option<&T> {
        match self.slots.get(idx.slot as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: ArenaIdx) -> Option<&mut T> {
        match self.slots.get_mut(idx.slot as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutex-guarded [`Arena`] that grows in blocks and retries briefly before
/// expanding, per C3.
pub struct BlockPool<T> {
    arena: Mutex<Arena<T>>,
    block_size: usize,
    sleep_max_count: u32,
}

impl<T> BlockPool<T> {
    pub fn new(block_size: usize, sleep_max_count: u32) -> Self {
        Self {
            arena: Mutex::new(Arena::new()),
            block_size: block_size.max(1),
            sleep_max_count,
        }
    }

    /// Allocate a slot for `value`, retrying briefly and finally growing the
    /// pool by one block if the free list stays empty.
    pub fn alloc(&self, value: T) -> Result<ArenaIdx, TransactionError> {
        let mut attempt = 0;
        let mut value = value;
        loop {
            {
                let mut arena = self.arena.lock();
                match arena.try_insert(value) {
                    Ok(idx) => return Ok(idx),
                    Err(returned) => value = returned,
                }
            }
            if attempt >= self.sleep_max_count {
                let mut arena = self.arena.lock();
                arena.grow(self.block_size);
                attempt = 0;
                continue;
            }
            attempt += 1;
            thread::sleep(RETRY_SLEEP);
        }
    }

    pub fn free(&self, idx: ArenaIdx) -> Option<T> {
        self.arena.lock().remove(idx)
    }

    pub fn with<R>(&self, idx: ArenaIdx, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.arena.lock().get(idx).map(f)
    }

    pub fn with_mut<R>(&self, idx: ArenaIdx, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.arena.lock().get_mut(idx).map(f)
    }

    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove_roundtrip() {
        let mut arena: Arena<i32> = Arena::new();
        arena.grow(4);
        let a = arena.try_insert(10).unwrap();
        let b = arena.try_insert(20).unwrap();
        assert_eq!(*arena.get(a).unwrap(), 10);
        assert_eq!(*arena.get(b).unwrap(), 20);
        assert_eq!(arena.remove(a), Some(10));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_after_reuse_is_rejected() {
        let mut arena: Arena<i32> = Arena::new();
        arena.grow(1);
        let a = arena.try_insert(1).unwrap();
        arena.remove(a).unwrap();
        let b = arena.try_insert(2).unwrap();
        assert_eq!(b.slot, a.slot);
        assert_ne!(b.generation, a.generation);
        assert_eq!(arena.get(a), None);
        assert_eq!(*arena.get(b).unwrap(), 2);
    }

    #[test]
    fn block_pool_grows_when_exhausted() {
        let pool: BlockPool<i32> = BlockPool::new(2, 0);
        let mut idxs = Vec::new();
        for i in 0..5 {
            idxs.push(pool.alloc(i).unwrap());
        }
        assert_eq!(pool.len(), 5);
        for (i, idx) in idxs.iter().enumerate() {
            assert_eq!(pool.with(*idx, |v| *v), Some(i as i32));
        }
    }
}
