//! The lock mode lattice and its compatibility/conversion algebra.
//!
//! `Mode` is the fixed set of multi-granularity lock modes used throughout
//! the lock manager: the three intention modes (`IS`, `IX`, `SIX`), the two
//! "weak" instance modes used for non-two-phase reads (`NS`, `NX`), the
//! update mode `U`, the two terminal modes (`S`, `X`), and `Null` (no lock).
//! `IsolationIncons` is a pseudo-mode that never participates in `compat`/
//! `conv`; it only ever appears as a marker on a non-2PL record.

use std::fmt;

/// A lock mode in the multi-granularity lattice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Null,
    Is,
    Ix,
    S,
    Six,
    U,
    Ns,
    Nx,
    X,
    /// Terminal marker attached to a non-2PL entry once a conflicting lock
    /// has been observed elsewhere; never appears as an argument to
    /// `compat`/`conv`.
    IsolationIncons,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Null => "NULL",
            Mode::Is => "IS",
            Mode::Ix => "IX",
            Mode::S => "S",
            Mode::Six => "SIX",
            Mode::U => "U",
            Mode::Ns => "NS",
            Mode::Nx => "NX",
            Mode::X => "X",
            Mode::IsolationIncons => "INCON_NON_TWO_PHASE",
        };
        write!(f, "{s}")
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Null
    }
}

/// Index a mode into the 9x9 compat/conv tables (`IsolationIncons` excluded).
fn ord(m: Mode) -> usize {
    match m {
        Mode::Null => 0,
        Mode::Is => 1,
        Mode::Ix => 2,
        Mode::S => 3,
        Mode::Six => 4,
        Mode::U => 5,
        Mode::Ns => 6,
        Mode::Nx => 7,
        Mode::X => 8,
        Mode::IsolationIncons => {
            panic!("INCON_NON_TWO_PHASE is not a member of the compat/conv lattice")
        }
    }
}

const N: usize = 9;
const ALL: [Mode; N] = [
    Mode::Null,
    Mode::Is,
    Mode::Ix,
    Mode::S,
    Mode::Six,
    Mode::U,
    Mode::Ns,
    Mode::Nx,
    Mode::X,
];

/// Compatibility matrix. `NS`/`NX` are the "weak" companions of `S`/`X`: a
/// second reader may still hold `NS` alongside another `NS`/`IS`, but `NX`
/// behaves like `X` to every other requester. `U` is the classic anti-
/// deadlock update lock: compatible with `IS`/`S` (so readers are not
/// blocked by an update-intent scanner) but not with itself or `IX`.
const fn compat_row(m: Mode) -> [bool; N] {
    match m {
        Mode::Null => [true; N],
        Mode::Is => [true, true, true, true, true, true, true, true, false],
        Mode::Ix => [true, true, true, false, false, false, false, false, false],
        Mode::S => [true, true, false, true, false, true, true, false, false],
        Mode::Six => [true, true, false, false, false, false, false, false, false],
        Mode::U => [true, true, false, true, false, false, true, false, false],
        Mode::Ns => [true, true, false, true, false, true, true, false, false],
        Mode::Nx => [true, true, false, false, false, false, false, false, false],
        Mode::X => [true, false, false, false, false, false, false, false, false],
        Mode::IsolationIncons => [false; N],
    }
}

/// `compat(a, b)`: can a holder of `a` coexist with a requester/holder of `b`.
pub fn compat(a: Mode, b: Mode) -> bool {
    compat_row(a)[ord(b)]
}

/// Least-upper-bound table for `conv`. Built once; `conv(x, Null) = x` and
/// the table is symmetric.
const CONV_TABLE: [[Mode; N]; N] = {
    use Mode::*;
    [
        // Null
        [Null, Is, Ix, S, Six, U, Ns, Nx, X],
        // Is
        [Is, Is, Ix, S, Six, U, Ns, Nx, X],
        // Ix
        [Ix, Ix, Ix, Six, Six, Six, Ix, Ix, X],
        // S
        [S, S, Six, S, Six, S, S, X, X],
        // Six
        [Six, Six, Six, Six, Six, Six, Six, X, X],
        // U
        [U, U, Six, S, Six, U, U, X, X],
        // Ns
        [Ns, Ns, Ix, S, Six, U, Ns, Nx, X],
        // Nx
        [Nx, Nx, Ix, X, X, X, Nx, Nx, X],
        // X
        [X, X, X, X, X, X, X, X, X],
    ]
};

/// `conv(a, b)`: the strongest mode that covers both `a` and `b`.
pub fn conv(a: Mode, b: Mode) -> Mode {
    CONV_TABLE[ord(a)][ord(b)]
}

/// Fold `conv` over an iterator of modes, starting from `Null`.
pub fn conv_fold<I: IntoIterator<Item = Mode>>(modes: I) -> Mode {
    modes.into_iter().fold(Mode::Null, conv)
}

/// The intention lock required on a class to hold `mode` on one of its
/// instances (§4.5, Invariant 6). `S`/`NS` instance locks need `IS`;
/// anything stronger needs `IX`.
pub fn required_intent(instance_mode: Mode) -> Mode {
    match instance_mode {
        Mode::Null => Mode::Null,
        Mode::S | Mode::Ns | Mode::U => Mode::Is,
        _ => Mode::Ix,
    }
}

/// True if `mode` is one of the modes that can legitimately be downgraded to
/// a non-2PL marker under a weak isolation level (§4.5.3). `U` is
/// deliberately excluded: a non-2PL marker is released the instant a later
/// statement conflicts with it, which would silently drop the mutual
/// exclusion an update lock exists to provide.
pub fn is_non2pl_eligible(mode: Mode) -> bool {
    matches!(mode, Mode::S | Mode::Ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_unit_of_conv() {
        for m in ALL {
            assert_eq!(conv(m, Mode::Null), m);
            assert_eq!(conv(Mode::Null, m), m);
        }
    }

    #[test]
    fn conv_is_commutative() {
        for a in ALL {
            for b in ALL {
                assert_eq!(conv(a, b), conv(b, a), "conv({a}, {b}) not commutative");
            }
        }
    }

    #[test]
    fn conv_is_associative() {
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    assert_eq!(conv(a, conv(b, c)), conv(conv(a, b), c));
                }
            }
        }
    }

    #[test]
    fn x_dominates_everything() {
        for m in ALL {
            assert_eq!(conv(Mode::X, m), Mode::X);
        }
    }

    #[test]
    fn compat_is_reflexive_only_for_weak_modes() {
        assert!(compat(Mode::Is, Mode::Is));
        assert!(compat(Mode::Ns, Mode::Ns));
        assert!(!compat(Mode::X, Mode::X));
        assert!(!compat(Mode::Ix, Mode::Ix));
        assert!(!compat(Mode::U, Mode::U));
    }

    #[test]
    fn is_compatible_with_everything_but_x() {
        for m in ALL {
            if m == Mode::X {
                assert!(!compat(Mode::Is, m));
            } else {
                assert!(compat(Mode::Is, m), "IS should tolerate {m}");
            }
        }
    }

    #[test]
    fn required_intent_matches_strength() {
        assert_eq!(required_intent(Mode::S), Mode::Is);
        assert_eq!(required_intent(Mode::Ns), Mode::Is);
        assert_eq!(required_intent(Mode::X), Mode::Ix);
        assert_eq!(required_intent(Mode::Six), Mode::Ix);
        assert_eq!(required_intent(Mode::Null), Mode::Null);
    }
}
