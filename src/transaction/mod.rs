//! Multi-granularity lock management.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`lock_mode`] | The lock mode lattice: compatibility and conversion |
//! | [`lock_oid`] | Resource identifiers and their classification |
//! | [`lock_arena`] | Generation-checked, block-growable slot allocators |
//! | [`lock_entry`] | The per-(transaction, resource) lock record |
//! | [`lock_table`] | The hashed resource table |
//! | [`lock_txn_table`] | Per-transaction hold lists and scan-id bitmap |
//! | [`lock_isolation`] | Isolation-level-driven release policy |
//! | [`lock_config`] | Tunable parameters |
//! | [`lock_wait`] | Waiter suspension and resumption |
//! | [`lock_manager`] | The request/release engine and public entry point |
//! | [`deadlock`] | Wait-for-graph construction and cycle detection |
//! | [`error`] | Error taxonomy |

pub mod deadlock;
pub mod error;
pub mod lock_arena;
pub mod lock_config;
pub mod lock_entry;
pub mod lock_isolation;
pub mod lock_manager;
pub mod lock_mode;
pub mod lock_oid;
pub mod lock_table;
pub mod lock_txn_table;
pub mod lock_wait;

pub use crate::common::TransactionId;

pub use deadlock::{DeadlockStats, WaitForGraph};
pub use error::{TransactionError, TransactionResult};
pub use lock_config::{LockManagerConfig, TimeoutDumpLevel};
pub use lock_isolation::{ReleaseAction, TranIsolation};
pub use lock_manager::{CompositeLock, LockManager, LockSetOutcome, Outcome};
pub use lock_mode::{compat, conv, conv_fold, required_intent, Mode};
pub use lock_oid::{Oid, ResourceKind, ROOT_OID};
pub use lock_wait::{ResumeStatus, WaitBudget};
