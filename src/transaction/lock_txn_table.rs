//! Per-transaction lock bookkeeping (C4).
//!
//! Two independent mutexes guard a transaction's state, matching §3: one
//! for the root-class/class/instance hold lists (mutated whenever a lock on
//! this transaction is granted or released), one for the non-2PL list
//! (mutated independently since it can change without the transaction
//! itself making a call, e.g. when another transaction's write downgrades
//! one of this transaction's non-2PL markers to `INCON_NON_TWO_PHASE`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::TransactionId;

use super::lock_arena::ArenaIdx;
use super::lock_entry::ScanBitset;

#[derive(Default)]
pub struct HoldLists {
    pub root_class: Option<ArenaIdx>,
    pub class_hold: Vec<ArenaIdx>,
    pub instance_hold: Vec<ArenaIdx>,
}

#[derive(Default)]
pub struct Non2plList {
    pub entries: Vec<ArenaIdx>,
    pub num_incons: u32,
}

pub struct TxnLockTable {
    pub tran_id: TransactionId,
    pub hold: Mutex<HoldLists>,
    pub non2pl: Mutex<Non2plList>,
    pub instant_mode: AtomicBool,
    pub escalating: AtomicBool,
    pub interrupted: AtomicBool,
    pub scan_bits: Mutex<ScanIdAllocator>,
}

impl TxnLockTable {
    fn new(tran_id: TransactionId, max_scanid_bit: usize) -> Self {
        Self {
            tran_id,
            hold: Mutex::new(HoldLists::default()),
            non2pl: Mutex::new(Non2plList::default()),
            instant_mode: AtomicBool::new(false),
            escalating: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            scan_bits: Mutex::new(ScanIdAllocator::new(max_scanid_bit)),
        }
    }

    pub fn is_instant_mode(&self) -> bool {
        self.instant_mode.load(Ordering::Acquire)
    }

    pub fn set_interrupted(&self, value: bool) {
        self.interrupted.store(value, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }
}

/// Allocator for the per-transaction scan-id bitmap (§4.12).
pub struct ScanIdAllocator {
    capacity: usize,
    used: ScanBitset,
}

impl ScanIdAllocator {
    fn new(capacity: usize) -> Self {
        Self { capacity, used: ScanBitset::new() }
    }

    pub fn allocate(&mut self) -> Option<usize> {
        for bit in 0..self.capacity {
            if !self.used.get(bit) {
                self.used.set(bit);
                return Some(bit);
            }
        }
        None
    }

    pub fn release(&mut self, bit: usize) {
        self.used.clear(bit);
    }
}

/// Registry of per-transaction tables, indexed by transaction id. Lives for
/// the lifetime of the server; entries are created lazily on first lock
/// request and dropped explicitly once a transaction ends, via a single
/// shared map guarded by one `RwLock`.
pub struct TxnTableRegistry {
    tables: RwLock<HashMap<TransactionId, Arc<TxnLockTable>>>,
    max_scanid_bit: usize,
}

impl TxnTableRegistry {
    pub fn new(max_scanid_bit: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            max_scanid_bit,
        }
    }

    pub fn get_or_create(&self, tran_id: TransactionId) -> Arc<TxnLockTable> {
        if let Some(t) = self.tables.read().get(&tran_id) {
            return Arc::clone(t);
        }
        let mut tables = self.tables.write();
        Arc::clone(
            tables
                .entry(tran_id)
                .or_insert_with(|| Arc::new(TxnLockTable::new(tran_id, self.max_scanid_bit))),
        )
    }

    pub fn get(&self, tran_id: TransactionId) -> Option<Arc<TxnLockTable>> {
        self.tables.read().get(&tran_id).cloned()
    }

    pub fn remove(&self, tran_id: TransactionId) {
        self.tables.write().remove(&tran_id);
    }

    pub fn active_transaction_ids(&self) -> Vec<TransactionId> {
        self.tables.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_creates_lazily_and_reuses() {
        let reg = TxnTableRegistry::new(64);
        let a = reg.get_or_create(1);
        let b = reg.get_or_create(1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.active_transaction_ids(), vec![1]);
    }

    #[test]
    fn scan_id_allocator_reuses_released_bits() {
        let mut alloc = ScanIdAllocator::new(4);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_ne!(a, b);
        alloc.release(a);
        let c = alloc.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn scan_id_allocator_exhausts() {
        let mut alloc = ScanIdAllocator::new(1);
        assert!(alloc.allocate().is_some());
        assert!(alloc.allocate().is_none());
    }
}
