//! The lock-entry record (§3, "Entry record") and its scan-id bitset.

use std::sync::Arc;

use crate::common::TransactionId;

use super::lock_arena::ArenaIdx;
use super::lock_mode::Mode;
use super::lock_oid::Oid;
use super::lock_table::ResourceHandle;
use super::lock_wait::WaitSlot;

/// Fixed-width bitset tagging the index scans an entry participates in
/// (§4.12). Scan ids are small integers handed out by
/// [`super::lock_manager::LockManager::alloc_scan_id`].
#[derive(Debug, Clone, Default)]
pub struct ScanBitset {
    words: Vec<u64>,
}

impl ScanBitset {
    pub fn new() -> Self {
        Self { words: Vec::new() }
    }

    pub fn set(&mut self, bit: usize) {
        let word = bit / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % 64);
    }

    pub fn clear(&mut self, bit: usize) {
        let word = bit / 64;
        if word < self.words.len() {
            self.words[word] &= !(1 << (bit % 64));
        }
    }

    pub fn get(&self, bit: usize) -> bool {
        let word = bit / 64;
        self.words.get(word).map(|w| w & (1 << (bit % 64)) != 0).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }
}

/// One (transaction, resource) lock record.
pub struct Entry {
    pub tran_id: TransactionId,
    pub resource: ResourceHandle,
    pub resource_oid: Oid,
    pub class_oid: Option<Oid>,
    pub granted_mode: Mode,
    pub blocked_mode: Mode,
    /// Number of unreleased acquisitions (Invariant 6); the manager is
    /// reference-counted, not idempotent.
    pub count: u32,
    /// Link to the class-level entry, for granule counting toward
    /// escalation (§4.5.4).
    pub class_entry: Option<ArenaIdx>,
    pub ngranules: u32,
    /// Outstanding instant-duration acquisitions on this entry (§4.11).
    pub instant_count: u32,
    /// Stack of previously requested modes, consulted by isolation-policy
    /// release (§4.5.5, §4.9) to decide demote-vs-noop.
    pub history: Vec<Mode>,
    pub scan_bits: ScanBitset,
    /// Present only while this entry is a blocked holder or a waiter.
    pub wait: Option<Arc<WaitSlot>>,
}

impl Entry {
    pub fn new_holder(
        tran_id: TransactionId,
        resource: ResourceHandle,
        resource_oid: Oid,
        class_oid: Option<Oid>,
        mode: Mode,
    ) -> Self {
        Self {
            tran_id,
            resource,
            resource_oid,
            class_oid,
            granted_mode: mode,
            blocked_mode: Mode::Null,
            count: 1,
            class_entry: None,
            ngranules: 0,
            instant_count: 0,
            history: vec![mode],
            scan_bits: ScanBitset::new(),
            wait: None,
        }
    }

    /// A brand-new waiter record (§4.5 step 4, "Allocate an entry in
    /// blocked state"): nothing has been granted yet, so `count` starts at
    /// zero and `history` is empty until the request is actually granted.
    pub fn new_waiter(
        tran_id: TransactionId,
        resource: ResourceHandle,
        resource_oid: Oid,
        class_oid: Option<Oid>,
        blocked_mode: Mode,
        wait: Arc<WaitSlot>,
    ) -> Self {
        Self {
            tran_id,
            resource,
            resource_oid,
            class_oid,
            granted_mode: Mode::Null,
            blocked_mode,
            count: 0,
            class_entry: None,
            ngranules: 0,
            instant_count: 0,
            history: Vec::new(),
            scan_bits: ScanBitset::new(),
            wait: Some(wait),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_mode != Mode::Null
    }
}
