//! The hashed lock-resource table (C2).
//!
//! Each bucket is an independently mutexed chain of resources; a caller
//! looks up or creates a resource under the bucket mutex, then latches the
//! resource's own mutex and releases the bucket mutex, so concurrent
//! requests against different resources in the same bucket don't serialize
//! on each other's holder-list work.

use std::sync::Arc;

use parking_lot::Mutex;

use super::lock_arena::ArenaIdx;
use super::lock_mode::Mode;
use super::lock_oid::{hash_oid, Oid, ResourceKind};

/// Shared handle to a resource record. Entries hold a clone of this to
/// reach their resource without a second hash lookup.
pub type ResourceHandle = Arc<Mutex<ResourceRecord>>;

/// One resource's holder/waiter/non-2PL state (§3, "Resource record").
pub struct ResourceRecord {
    pub oid: Oid,
    pub class_oid: Option<Oid>,
    pub kind: ResourceKind,
    pub total_holders_mode: Mode,
    pub total_waiters_mode: Mode,
    pub holders: Vec<ArenaIdx>,
    pub waiters: Vec<ArenaIdx>,
    pub non2pl: Vec<ArenaIdx>,
}

impl ResourceRecord {
    fn new(oid: Oid, class_oid: Option<Oid>) -> Self {
        Self {
            oid,
            class_oid,
            kind: ResourceKind::classify(&oid),
            total_holders_mode: Mode::Null,
            total_waiters_mode: Mode::Null,
            holders: Vec::new(),
            waiters: Vec::new(),
            non2pl: Vec::new(),
        }
    }

    /// Invariant 4: a resource is removed exactly when all three chains are
    /// empty.
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty() && self.non2pl.is_empty()
    }
}

struct Bucket {
    chain: Vec<(Oid, ResourceHandle)>,
}

/// The hashed directory from [`Oid`] to [`ResourceHandle`].
pub struct ResourceTable {
    buckets: Vec<Mutex<Bucket>>,
    size: usize,
}

impl ResourceTable {
    pub fn new(bucket_count: usize) -> Self {
        debug_assert!(bucket_count.is_power_of_two());
        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(Bucket { chain: Vec::new() }));
        }
        Self { buckets, size: bucket_count }
    }

    fn bucket_index(&self, oid: &Oid) -> usize {
        hash_oid(oid, self.size)
    }

    /// Find the resource for `oid`, latching bucket then resource, per §4.2.
    pub fn find(&self, oid: &Oid) -> Option<ResourceHandle> {
        let bucket = self.buckets[self.bucket_index(oid)].lock();
        bucket.chain.iter().find(|(o, _)| o == oid).map(|(_, r)| Arc::clone(r))
    }

    /// Find the resource for `oid`, creating it (with `class_oid` recorded,
    /// relevant for instance resources) if absent.
    pub fn find_or_create(&self, oid: &Oid, class_oid: Option<Oid>) -> ResourceHandle {
        let mut bucket = self.buckets[self.bucket_index(oid)].lock();
        if let Some((_, r)) = bucket.chain.iter().find(|(o, _)| o == oid) {
            return Arc::clone(r);
        }
        let record = Arc::new(Mutex::new(ResourceRecord::new(*oid, class_oid)));
        bucket.chain.push((*oid, Arc::clone(&record)));
        record
    }

    /// Attempt to deallocate `oid`'s resource once it becomes empty (§4.2).
    ///
    /// The caller must have already released the resource's own mutex
    /// before calling this (callers reach `try_gc` from `with_mut`, which
    /// drops that lock on return); `try_gc` takes the bucket mutex itself
    /// (trylock first, falling back to a blocking lock on contention) and
    /// briefly re-locks `resource` only to recheck emptiness under the
    /// bucket lock, to avoid a bucket-then-resource lock inversion.
    /// `resource` must be the handle for `oid`.
    pub fn try_gc(&self, oid: &Oid, resource: &ResourceHandle) {
        let idx = self.bucket_index(oid);
        if let Some(mut bucket) = self.buckets[idx].try_lock() {
            self.remove_if_empty_locked(&mut bucket, oid, resource);
            return;
        }
        // Contended: block for the bucket mutex and recheck emptiness.
        let mut bucket = self.buckets[idx].lock();
        self.remove_if_empty_locked(&mut bucket, oid, resource);
    }

    fn remove_if_empty_locked(&self, bucket: &mut Bucket, oid: &Oid, resource: &ResourceHandle) {
        let still_empty = resource.lock().is_empty();
        if !still_empty {
            return;
        }
        bucket.chain.retain(|(o, r)| !(o == oid && Arc::ptr_eq(r, resource)));
    }

    /// Total number of resources currently tracked (supplemented
    /// `lock_get_number_object_locks`).
    pub fn resource_count(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().chain.len()).sum()
    }

    /// Run `f` over every resource currently in the table. Each resource is
    /// visited under its own mutex, one at a time; the deadlock detector
    /// (C8) uses this to build WFG edges without ever holding two resource
    /// mutexes simultaneously.
    pub fn for_each_resource(&self, mut f: impl FnMut(&ResourceRecord)) {
        for bucket in &self.buckets {
            let chain: Vec<ResourceHandle> = bucket.lock().chain.iter().map(|(_, r)| Arc::clone(r)).collect();
            for r in chain {
                f(&r.lock());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_or_create_is_idempotent() {
        let table = ResourceTable::new(16);
        let oid = Oid::new(0, 5, 1);
        let a = table.find_or_create(&oid, Some(Oid::new(0, 5, 0)));
        let b = table.find_or_create(&oid, None);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn gc_removes_empty_resource() {
        let table = ResourceTable::new(16);
        let oid = Oid::new(0, 5, 1);
        let handle = table.find_or_create(&oid, None);
        assert!(table.find(&oid).is_some());
        table.try_gc(&oid, &handle);
        assert!(table.find(&oid).is_none());
    }

    #[test]
    fn gc_is_noop_when_not_empty() {
        let table = ResourceTable::new(16);
        let oid = Oid::new(0, 5, 1);
        let handle = table.find_or_create(&oid, None);
        handle.lock().holders.push(ArenaIdx::default_for_test());
        table.try_gc(&oid, &handle);
        assert!(table.find(&oid).is_some());
    }

    #[test]
    fn resource_count_tracks_chain_sizes() {
        let table = ResourceTable::new(16);
        assert_eq!(table.resource_count(), 0);
        table.find_or_create(&Oid::new(0, 1, 0), None);
        table.find_or_create(&Oid::new(0, 2, 0), None);
        assert_eq!(table.resource_count(), 2);
    }
}
