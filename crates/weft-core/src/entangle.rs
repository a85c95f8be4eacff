// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Entangled node sets.
//!
//! Entanglement makes several node objects behave as one logical duplicate:
//! attribute and contents mutations applied to any member fan out to all
//! peers synchronously within the same call. Sets live in a side table
//! owned by the graph; each member node keeps an [`EntangleId`] handle.
//!
//! Invariant: a set of size ≤ 1 is equivalent to "not entangled" and
//! auto-collapses — [`EntangleTable::remove`] dissolves such sets and
//! reports the orphaned member so the graph can clear its handle.

use std::collections::BTreeSet;

use crate::ident::{EntangleId, NodeId};

/// Result of removing a member from a set.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RemoveOutcome {
    /// The member was removed; the set stays alive.
    Removed,
    /// Removal left one peer behind; the set collapsed and that peer's
    /// handle must be cleared too.
    Collapsed(NodeId),
    /// The member was not in the set.
    NotAMember,
}

/// Side table of shared entanglement sets.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntangleTable {
    // Freed slots stay `None`; ids are not reused. Sets are tiny and
    // short-lived relative to the graph, so slot churn is irrelevant.
    sets: Vec<Option<BTreeSet<NodeId>>>,
}

impl EntangleTable {
    /// Creates a fresh set with the given members.
    pub(crate) fn create(&mut self, members: BTreeSet<NodeId>) -> EntangleId {
        debug_assert!(members.len() >= 2, "entangle sets start with >= 2 members");
        let id = EntangleId(u32::try_from(self.sets.len()).unwrap_or(u32::MAX));
        self.sets.push(Some(members));
        id
    }

    /// Adds `node` to an existing set.
    pub(crate) fn add(&mut self, id: EntangleId, node: NodeId) {
        if let Some(Some(set)) = self.sets.get_mut(id.index()) {
            set.insert(node);
        }
    }

    /// Removes `node` from the set, collapsing it when one peer remains.
    pub(crate) fn remove(&mut self, id: EntangleId, node: NodeId) -> RemoveOutcome {
        let Some(slot) = self.sets.get_mut(id.index()) else {
            return RemoveOutcome::NotAMember;
        };
        let Some(set) = slot.as_mut() else {
            return RemoveOutcome::NotAMember;
        };
        if !set.remove(&node) {
            return RemoveOutcome::NotAMember;
        }
        if set.len() == 1 {
            let last = set.iter().next().copied();
            *slot = None;
            return last.map_or(RemoveOutcome::Removed, RemoveOutcome::Collapsed);
        }
        RemoveOutcome::Removed
    }

    /// Merges set `b` into set `a`, returning the members that moved (their
    /// handles must be repointed to `a`).
    pub(crate) fn merge(&mut self, a: EntangleId, b: EntangleId) -> Vec<NodeId> {
        if a == b {
            return Vec::new();
        }
        let moved: Vec<NodeId> = self
            .sets
            .get_mut(b.index())
            .and_then(Option::take)
            .map_or_else(Vec::new, |set| set.into_iter().collect());
        if let Some(Some(set)) = self.sets.get_mut(a.index()) {
            set.extend(moved.iter().copied());
        }
        moved
    }

    /// Current members of a set. Empty when the id is stale.
    pub(crate) fn members(&self, id: EntangleId) -> Vec<NodeId> {
        self.sets
            .get(id.index())
            .and_then(|s| s.as_ref())
            .map_or_else(Vec::new, |set| set.iter().copied().collect())
    }
}
