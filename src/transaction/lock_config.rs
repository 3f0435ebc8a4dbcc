//! Tunable parameters for the lock manager.

use std::time::Duration;

/// Verbosity of the blocker-identification diagnostic attached to a
/// timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutDumpLevel {
    /// Don't identify the blocker at all.
    Suppressed,
    /// Name the first blocking holder/waiter.
    FirstBlocker,
    /// Name every blocker.
    AllBlockers,
}

#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Granule count on a class above which instance locks escalate to a
    /// class-level lock (§4.5.4).
    pub escalation_at: u32,
    /// Minimum interval between deadlock-detector runs.
    pub run_deadlock_interval: Duration,
    /// Diagnostic verbosity for lock-wait timeouts.
    pub timeout_message_dump_level: TimeoutDumpLevel,
    /// Width, in bits, of the per-transaction scan-id bitmap.
    pub max_scanid_bit: usize,
    /// Whether suspension/resumption events are logged verbosely.
    pub verbose_suspend: bool,
    /// Default dump verbosity for `dump()`.
    pub dump_level: u8,
    /// Dump verbosity used specifically when a deadlock is reported.
    pub dump_level_when_deadlock: u8,
    /// Number of resource/entry records allocated per pool-growth block.
    pub entry_block_size: usize,
    pub resource_block_size: usize,
    /// Number of ~10ms sleep-retries before an allocator grows its pool.
    pub sleep_max_count: u32,
    /// Number of buckets in the resource hash table; rounded up to a power
    /// of two by [`LockManagerConfig::bucket_count`].
    pub bucket_count_hint: usize,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            escalation_at: 10_000,
            run_deadlock_interval: Duration::from_secs(1),
            timeout_message_dump_level: TimeoutDumpLevel::FirstBlocker,
            max_scanid_bit: 256,
            verbose_suspend: false,
            dump_level: 1,
            dump_level_when_deadlock: 2,
            entry_block_size: 256,
            resource_block_size: 256,
            sleep_max_count: 10,
            bucket_count_hint: 1024,
        }
    }
}

impl LockManagerConfig {
    /// Resource-table bucket count, rounded up to the next power of two
    /// (required by [`super::lock_oid::hash_oid`]).
    pub fn bucket_count(&self) -> usize {
        self.bucket_count_hint.next_power_of_two().max(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_count_is_power_of_two() {
        let mut cfg = LockManagerConfig::default();
        cfg.bucket_count_hint = 100;
        assert_eq!(cfg.bucket_count(), 128);
        cfg.bucket_count_hint = 1024;
        assert_eq!(cfg.bucket_count(), 1024);
    }
}
