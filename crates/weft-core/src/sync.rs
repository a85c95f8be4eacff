// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Quantity, existence, and size synchronization.
//!
//! A sync relation resolves one node's quantity, existence, or size from
//! another node's state *within the current pass*. All lookups are gated on
//! the environment's drawn-attrs table: a target that has not been drawn
//! (generation order) or absorbed (parse order) yet makes the sync
//! inapplicable — a warning-level soft failure, never a hard error, so
//! hand-written grammars with ordering edge cases keep working.

use tracing::warn;

use crate::env::Env;
use crate::ident::NodeId;

/// The relation kinds a node can be synchronized under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    /// Repetition count equals the target's integer value (plus base).
    Qty,
    /// Repetition count is `max(0, target_value + base)`.
    QtyFrom,
    /// The node exists only while the condition holds.
    Existence,
    /// The node exists only while the condition does *not* hold.
    Inexistence,
    /// The node's integer value is fed from the target's serialized size.
    Size,
}

/// Quantity synchronization spec (`Qty` / `QtyFrom` scopes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QtySync {
    /// Sibling whose integer value drives the count.
    pub target: NodeId,
    /// Signed offset added to the target value.
    pub base: i64,
}

/// Size synchronization spec (`Size` scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeSync {
    /// Sibling whose serialized size feeds this node's value.
    pub target: NodeId,
    /// Signed offset added to the size.
    pub base: i64,
    /// Read the emitted (post-codec) size instead of the structural size.
    pub encoded: bool,
}

/// Boolean condition over sibling existence and values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistenceCond {
    /// The target was drawn with a non-zero quantity.
    Present(NodeId),
    /// The target was drawn and its current value equals `value`.
    ValueEq {
        /// Sibling whose value is compared.
        target: NodeId,
        /// Expected serialized value.
        value: Vec<u8>,
    },
    /// All sub-conditions hold.
    And(Vec<ExistenceCond>),
    /// At least one sub-condition holds.
    Or(Vec<ExistenceCond>),
}

/// The sync relations attached to one contents variant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRelations {
    /// `Qty` scope relation.
    pub qty: Option<QtySync>,
    /// `QtyFrom` scope relation.
    pub qty_from: Option<QtySync>,
    /// `Existence` scope condition.
    pub existence: Option<ExistenceCond>,
    /// `Inexistence` scope condition.
    pub inexistence: Option<ExistenceCond>,
    /// `Size` scope relation.
    pub size: Option<SizeSync>,
}

impl SyncRelations {
    /// `true` when no relation is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.qty.is_none()
            && self.qty_from.is_none()
            && self.existence.is_none()
            && self.inexistence.is_none()
            && self.size.is_none()
    }
}

/// Parameter accompanying [`crate::Graph::make_synchronized_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncParam {
    /// No parameter (base 0 / plain presence condition).
    None,
    /// Signed base offset for `Qty`/`QtyFrom`/`Size` scopes.
    Base(i64),
    /// Explicit condition for `Existence`/`Inexistence` scopes.
    Cond(ExistenceCond),
    /// `Size` scope against the emitted (post-codec) size, with offset.
    EncodedBase(i64),
}

/// Resolves a quantity sync (`Qty` and `QtyFrom` share the zero clamp).
///
/// The target must have been drawn this pass; its integer value then drives
/// the count. Returns `None` (inapplicable, with a warning) otherwise.
pub(crate) fn resolve_quantity(
    env: &Env,
    sync: &QtySync,
    value_of: impl Fn(NodeId) -> Option<u64>,
) -> Option<u64> {
    if env.drawn(sync.target).is_none() {
        warn!(sync_target = %sync.target, "quantity sync target not drawn yet; sync inapplicable");
        return None;
    }
    let Some(value) = value_of(sync.target) else {
        warn!(sync_target = %sync.target, "quantity sync target has no integer value; sync inapplicable");
        return None;
    };
    let raw = i64::try_from(value).unwrap_or(i64::MAX).saturating_add(sync.base);
    // QtyFrom is specified as max(0, value + base); plain Qty clamps the same
    // way rather than failing the pass on a negative offset.
    Some(u64::try_from(raw.max(0)).unwrap_or(0))
}

/// Resolves a size sync against the drawn-attrs table.
pub(crate) fn resolve_size(env: &Env, sync: &SizeSync) -> Option<usize> {
    let drawn = env.drawn(sync.target)?;
    let size = if sync.encoded {
        drawn.encoded_size.or(drawn.size)
    } else {
        drawn.size
    };
    let Some(size) = size else {
        warn!(sync_target = %sync.target, "size sync target has no recorded size; sync inapplicable");
        return None;
    };
    let raw = i64::try_from(size).unwrap_or(i64::MAX).saturating_add(sync.base);
    usize::try_from(raw.max(0)).ok()
}

/// Evaluates an existence condition.
///
/// `Some(true)` / `Some(false)` are definite answers; `None` means the
/// condition is not yet decidable (a referenced sibling has not been drawn)
/// and the caller must defer or degrade.
pub(crate) fn cond_holds(
    env: &Env,
    cond: &ExistenceCond,
    value_of: &impl Fn(NodeId) -> Option<Vec<u8>>,
) -> Option<bool> {
    match cond {
        ExistenceCond::Present(target) => env.drawn(*target).map(|d| d.qty.unwrap_or(0) > 0),
        ExistenceCond::ValueEq { target, value } => {
            let drawn = env.drawn(*target)?;
            if drawn.qty.unwrap_or(0) == 0 {
                return Some(false);
            }
            value_of(*target).map(|v| v == *value)
        }
        ExistenceCond::And(subs) => {
            let mut undecided = false;
            for sub in subs {
                match cond_holds(env, sub, value_of) {
                    Some(false) => return Some(false),
                    Some(true) => {}
                    None => undecided = true,
                }
            }
            if undecided {
                None
            } else {
                Some(true)
            }
        }
        ExistenceCond::Or(subs) => {
            let mut undecided = false;
            for sub in subs {
                match cond_holds(env, sub, value_of) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => undecided = true,
                }
            }
            if undecided {
                None
            } else {
                Some(false)
            }
        }
    }
}
