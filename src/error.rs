//! Crate-level error alias.
//!
//! The lock manager is the only subsystem in this crate, so its error type
//! doubles as the crate's top-level error type rather than being wrapped in
//! another layer of enum.

pub use crate::transaction::error::TransactionError as DbError;
pub use crate::transaction::error::TransactionResult as Result;
