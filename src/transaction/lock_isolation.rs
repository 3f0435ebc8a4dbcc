//! Isolation-level-driven release policy.
//!
//! `TranIsolation` names the six lock-release policies the lock manager
//! itself understands. It is intentionally narrower than a database-wide
//! isolation level: callers translate their own isolation setting into one
//! of these six release disciplines at the lock manager boundary.

use super::lock_mode::Mode;

/// The six lock-release policies, ordered roughly from strictest to most
/// relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranIsolation {
    Serializable,
    RepClassRepInstance,
    RepClassCommitInstance,
    RepClassUncommitInstance,
    CommitClassCommitInstance,
    CommitClassUncommitInstance,
}

impl Default for TranIsolation {
    fn default() -> Self {
        TranIsolation::RepClassCommitInstance
    }
}

impl TranIsolation {
    /// True for the three "uncommitted instance" variants, under which
    /// instance-level `S`/`NS` requests degrade to non-2PL markers instead
    /// of real locks (§4.5.3), and class-level `S`/`SIX` downgrade to
    /// `IS`/`IX` at request time.
    pub fn is_read_uncommitted_instance(&self) -> bool {
        matches!(
            self,
            TranIsolation::RepClassUncommitInstance | TranIsolation::CommitClassUncommitInstance
        )
    }

    /// True when instance locks are never actually taken (the uncommitted
    /// variants never acquire a real instance lock at all).
    pub fn never_locks_instances(&self) -> bool {
        self.is_read_uncommitted_instance()
    }

    /// What to do with a held shared-family *class* lock at statement end.
    pub fn class_release_action(&self) -> ReleaseAction {
        match self {
            TranIsolation::Serializable | TranIsolation::RepClassRepInstance => ReleaseAction::Keep,
            TranIsolation::RepClassCommitInstance | TranIsolation::RepClassUncommitInstance => {
                ReleaseAction::Demote
            }
            TranIsolation::CommitClassCommitInstance
            | TranIsolation::CommitClassUncommitInstance => ReleaseAction::Unlock,
        }
    }

    /// What to do with a held shared-family *instance* lock at statement end.
    pub fn instance_release_action(&self) -> ReleaseAction {
        match self {
            TranIsolation::Serializable => ReleaseAction::Keep,
            TranIsolation::RepClassRepInstance => ReleaseAction::DemoteOnScanEnd,
            TranIsolation::RepClassCommitInstance => ReleaseAction::Unlock,
            TranIsolation::RepClassUncommitInstance => ReleaseAction::NotApplicable,
            TranIsolation::CommitClassCommitInstance => ReleaseAction::Unlock,
            TranIsolation::CommitClassUncommitInstance => ReleaseAction::NotApplicable,
        }
    }

    /// Class-level downgrade applied to a *requested* mode at acquire time
    /// (§4.5, "Isolation downgrade on class locks").
    pub fn downgrade_class_request(&self, requested: Mode) -> Mode {
        if !self.is_read_uncommitted_instance() {
            return requested;
        }
        match requested {
            Mode::S => Mode::Is,
            Mode::Six => Mode::Ix,
            other => other,
        }
    }
}

/// What a release pass should do with a held lock of a given class at a
/// release checkpoint (statement end, scan end, commit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// Leave the lock exactly as held.
    Keep,
    /// Drop a shared-family lock to its intention counterpart
    /// (`S -> IS`, `SIX -> IX`), consulting acquisition history first.
    Demote,
    /// Only demote in response to an explicit scan-end notification.
    DemoteOnScanEnd,
    /// Release the lock entirely (after consulting acquisition history).
    Unlock,
    /// This isolation level never holds this class of lock at all.
    NotApplicable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_variants_never_lock_instances() {
        assert!(TranIsolation::RepClassUncommitInstance.never_locks_instances());
        assert!(TranIsolation::CommitClassUncommitInstance.never_locks_instances());
        assert!(!TranIsolation::Serializable.never_locks_instances());
    }

    #[test]
    fn serializable_keeps_everything() {
        let iso = TranIsolation::Serializable;
        assert_eq!(iso.class_release_action(), ReleaseAction::Keep);
        assert_eq!(iso.instance_release_action(), ReleaseAction::Keep);
    }

    #[test]
    fn commit_class_commit_instance_unlocks_both() {
        let iso = TranIsolation::CommitClassCommitInstance;
        assert_eq!(iso.class_release_action(), ReleaseAction::Unlock);
        assert_eq!(iso.instance_release_action(), ReleaseAction::Unlock);
    }

    #[test]
    fn downgrade_only_applies_under_uncommitted_instance() {
        let iso = TranIsolation::RepClassUncommitInstance;
        assert_eq!(iso.downgrade_class_request(Mode::S), Mode::Is);
        assert_eq!(iso.downgrade_class_request(Mode::Six), Mode::Ix);

        let serializable = TranIsolation::Serializable;
        assert_eq!(serializable.downgrade_class_request(Mode::S), Mode::S);
    }
}
