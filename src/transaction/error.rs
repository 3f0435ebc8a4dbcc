//! Error taxonomy for the lock manager (§7).
//!
//! `timeout` and the deadlock categories are not modeled as errors here:
//! `NOTGRANTED_*` results are non-error outcomes and travel through
//! [`super::lock_manager::Outcome`] instead of this error channel.
//! `strange-state` is logged via `tracing::warn!` at the call site rather
//! than returned at all, matching §7's "does not abort" note.

use thiserror::Error;

use crate::common::TransactionId;

use super::lock_mode::Mode;
use super::lock_oid::Oid;

/// Result type alias for lock manager operations.
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// Errors the lock manager can surface to its caller (§7).
#[derive(Debug, Error)]
pub enum TransactionError {
    /// C3's allocators stayed empty through the whole retry window.
    #[error("lock manager exhausted its {kind} pool after {retries} retries")]
    LockAllocationExhausted {
        kind: &'static str,
        retries: u32,
    },

    /// An entry was expected on a transaction's hold/waiter list (or a
    /// resource's holder/waiter chain) and was not found.
    #[error("invariant violation: entry for tran {tran_id} mode {mode} on {oid} missing from expected list")]
    LockInvariantViolation {
        tran_id: TransactionId,
        mode: Mode,
        oid: Oid,
    },

    /// Shutdown or client-requested cancellation while waiting.
    #[error("transaction {0} interrupted while waiting for a lock")]
    LockInterrupted(TransactionId),

    /// A caller-supplied argument violates the operation's own precondition
    /// (e.g. an instance lock requested without its class OID, or a
    /// composite-lock bucket exceeding its configured maximum) rather than
    /// any lock-table invariant.
    #[error("{operation}: {reason}")]
    LockInvalidRequest {
        operation: &'static str,
        reason: &'static str,
    },
}

impl TransactionError {
    pub fn allocation_exhausted(kind: &'static str, retries: u32) -> Self {
        TransactionError::LockAllocationExhausted { kind, retries }
    }

    pub fn invariant_violation(tran_id: TransactionId, mode: Mode, oid: Oid) -> Self {
        TransactionError::LockInvariantViolation { tran_id, mode, oid }
    }

    pub fn interrupted(tran_id: TransactionId) -> Self {
        TransactionError::LockInterrupted(tran_id)
    }

    pub fn invalid_request(operation: &'static str, reason: &'static str) -> Self {
        TransactionError::LockInvalidRequest { operation, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violation_carries_context() {
        let err = TransactionError::invariant_violation(7, Mode::X, Oid::new(0, 1, 2));
        assert!(err.to_string().contains("tran 7"));
    }

    #[test]
    fn allocation_exhausted_names_the_pool() {
        let err = TransactionError::allocation_exhausted("entry", 10);
        assert!(err.to_string().contains("entry"));
    }

    #[test]
    fn invalid_request_names_operation_and_reason() {
        let err = TransactionError::invalid_request("lock", "instance lock requires a class_oid");
        assert!(err.to_string().contains("lock"));
        assert!(err.to_string().contains("class_oid"));
    }
}
