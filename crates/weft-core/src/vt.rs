// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Value-type plugin contract.
//!
//! Leaf nodes delegate byte production and parsing to an external value
//! type (integers, strings, bit-fields, ...). The engine depends only on
//! this contract; concrete implementations live outside the core (see the
//! `weft-values` crate). Two-phase absorption is part of the contract:
//! [`ValueType::do_absorb`] applies tentative state which is either undone
//! by [`ValueType::do_revert_absorb`] (attempt aborted) or finalized by
//! [`ValueType::do_cleanup_absorb`] (the whole top-level absorb succeeded).

use crate::csts::{AbsCsts, AbsorbHints, AbsorbOutcome};

/// Behavior contract for external leaf value types.
///
/// Implementations must be cheap to clone (via [`ValueType::clone_box`]) —
/// the engine clones leaves freely during container expansion and
/// absorption backtracking.
///
/// Panic policy: the engine wraps every call into a plugin in a panic
/// boundary and downgrades a panic to a rejection (absorption) or a default
/// value (generation), so a misbehaving plugin cannot take down a parse.
pub trait ValueType: core::fmt::Debug {
    /// Produces the current concrete byte value, advancing any internal
    /// enumeration cursor when the type is determinist.
    fn get_value(&mut self) -> Vec<u8>;

    /// Decides whether (and where) `blob` matches this value under the
    /// given constraints, without mutating state.
    ///
    /// A non-zero outcome offset is only legal when `hints.scan_ahead` is
    /// set (a postponed sibling is pending and the gap feeds it).
    fn absorb_auto_helper(&self, blob: &[u8], csts: AbsCsts, hints: &AbsorbHints) -> AbsorbOutcome;

    /// Applies the match decided by [`ValueType::absorb_auto_helper`] as
    /// tentative state and returns the absorbed bytes.
    fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8>;

    /// Rolls tentative absorption state back to the pre-attempt value.
    fn do_revert_absorb(&mut self);

    /// Commits tentative absorption state; called once the entire top-level
    /// absorb has succeeded.
    fn do_cleanup_absorb(&mut self);

    /// Discards all computed and enumeration state, returning the type to
    /// its post-construction state.
    fn reset_state(&mut self);

    /// Rewinds the enumeration cursor by one step so the previous value is
    /// produced again.
    fn rewind(&mut self);

    /// `true` once a determinist/finite enumeration has produced its last
    /// value.
    fn is_exhausted(&self) -> bool;

    /// Switches to deterministic value enumeration.
    fn make_determinist(&mut self);

    /// Switches to random value selection.
    fn make_random(&mut self);

    /// The current value interpreted as an unsigned integer, when the type
    /// has a natural integer reading. Quantity synchronization reads this.
    fn as_u64(&self) -> Option<u64> {
        None
    }

    /// Overwrites the current value from an unsigned integer (size sync
    /// feedback). Returns `false` when the type has no integer writing.
    fn set_u64(&mut self, value: u64) -> bool {
        let _ = value;
        false
    }

    /// Object-safe clone.
    fn clone_box(&self) -> Box<dyn ValueType>;
}

impl Clone for Box<dyn ValueType> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A minimal in-crate value type for engine unit tests.

    use super::ValueType;
    use crate::csts::{AbsCsts, AbsorbHints, AbsorbOutcome};

    /// Fixed byte-string leaf: freezes to `bytes`, absorbs only `bytes`
    /// (scanning ahead for them when permitted).
    #[derive(Debug, Clone)]
    pub(crate) struct FixedBytes {
        bytes: Vec<u8>,
        absorbed: Option<Vec<u8>>,
        committed: Option<Vec<u8>>,
    }

    impl FixedBytes {
        pub(crate) fn new(bytes: impl Into<Vec<u8>>) -> Self {
            Self {
                bytes: bytes.into(),
                absorbed: None,
                committed: None,
            }
        }
    }

    impl ValueType for FixedBytes {
        fn get_value(&mut self) -> Vec<u8> {
            self.absorbed
                .as_ref()
                .or(self.committed.as_ref())
                .unwrap_or(&self.bytes)
                .clone()
        }

        fn absorb_auto_helper(
            &self,
            blob: &[u8],
            csts: AbsCsts,
            hints: &AbsorbHints,
        ) -> AbsorbOutcome {
            let pat = &self.bytes;
            if pat.is_empty() {
                return AbsorbOutcome::absorbed(0, 0);
            }
            if !csts.contents() {
                if blob.len() < pat.len() {
                    return AbsorbOutcome::reject();
                }
                return AbsorbOutcome::absorbed(0, pat.len());
            }
            let limit = if hints.scan_ahead {
                blob.len().saturating_sub(pat.len())
            } else {
                0
            };
            (0..=limit)
                .find(|&off| blob[off..].starts_with(pat))
                .map_or_else(AbsorbOutcome::reject, |off| {
                    AbsorbOutcome::absorbed(off, pat.len())
                })
        }

        fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8> {
            let taken = blob[offset..offset + size].to_vec();
            self.absorbed = Some(taken.clone());
            taken
        }

        fn do_revert_absorb(&mut self) {
            self.absorbed = None;
        }

        fn do_cleanup_absorb(&mut self) {
            if let Some(v) = self.absorbed.take() {
                self.committed = Some(v);
            }
        }

        fn reset_state(&mut self) {
            self.absorbed = None;
            self.committed = None;
        }

        fn rewind(&mut self) {}

        fn is_exhausted(&self) -> bool {
            true
        }

        fn make_determinist(&mut self) {}

        fn make_random(&mut self) {}

        fn as_u64(&self) -> Option<u64> {
            let cur = self
                .absorbed
                .as_ref()
                .or(self.committed.as_ref())
                .unwrap_or(&self.bytes);
            match cur.len() {
                1 => Some(u64::from(cur[0])),
                _ => None,
            }
        }

        fn clone_box(&self) -> Box<dyn ValueType> {
            Box::new(self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedBytes;
    use super::*;
    use crate::csts::AbsorbStatus;

    #[test]
    fn fixed_bytes_two_phase_absorb() {
        let mut vt = FixedBytes::new(*b"ab");
        let hints = AbsorbHints::default();
        let out = vt.absorb_auto_helper(b"abXY", AbsCsts::full(), &hints);
        assert_eq!(out, AbsorbOutcome::absorbed(0, 2));
        vt.do_absorb(b"abXY", 0, 2);
        vt.do_revert_absorb();
        assert_eq!(vt.get_value(), b"ab".to_vec());
    }

    #[test]
    fn scan_ahead_finds_interior_match() {
        let vt = FixedBytes::new(*b"ZZ");
        let hints = AbsorbHints {
            scan_ahead: true,
            ..AbsorbHints::default()
        };
        let out = vt.absorb_auto_helper(b"xxZZy", AbsCsts::full(), &hints);
        assert_eq!(out, AbsorbOutcome::absorbed(2, 2));
    }

    #[test]
    fn no_scan_without_pending_postponed() {
        let vt = FixedBytes::new(*b"ZZ");
        let out = vt.absorb_auto_helper(b"xxZZy", AbsCsts::full(), &AbsorbHints::default());
        assert_eq!(out.status, AbsorbStatus::Reject);
    }
}
