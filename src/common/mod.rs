//! Shared identifier types used across the lock manager.

/// A transaction identifier, assigned by the caller (e.g. the transaction
/// table) and treated as opaque here. Lock manager state is keyed on this
/// value; it is never reused while a transaction's locks are still live.
pub type TransactionId = u64;
