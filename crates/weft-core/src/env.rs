// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-graph shared environment.
//!
//! One [`Env`] exists per independent graph. During a freeze or absorb pass
//! the engine records, per child *descriptor* identity, the drawn repetition
//! quantity and serialized size; sibling synchronization objects read those
//! records later in the same pass. The environment also tracks exhausted
//! nodes, one-pass corruption hooks, and the deferred job queues.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::ident::NodeId;
use crate::jobs::JobQueues;

/// Quantities recorded for a drawn child descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawnAttrs {
    /// Realized repetition count.
    pub qty: Option<u64>,
    /// Serialized byte size across all realized instances, before any codec
    /// attached to the emitting container runs.
    pub size: Option<usize>,
    /// Emitted byte size after the codec, when one is attached. Equals
    /// `size` otherwise.
    pub encoded_size: Option<usize>,
}

/// One-pass override of an engine decision for a specific node identity.
///
/// Hooks let an external fuzz strategy corrupt a quantity, existence, or
/// synced-size decision without mutating the grammar definition; each hook
/// is consumed the first time the engine reaches the decision it overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptHook {
    /// Force the drawn quantity of a child descriptor.
    Qty(u64),
    /// Force the existence decision of a conditioned child.
    Existence(bool),
    /// Force the value a size sync resolves to.
    SyncSize(usize),
}

/// Mutable shared state scoped to one graph instance.
#[derive(Debug, Clone, Default)]
pub struct Env {
    drawn: FxHashMap<NodeId, DrawnAttrs>,
    exhausted: FxHashSet<NodeId>,
    corrupt: FxHashMap<NodeId, CorruptHook>,
    pub(crate) jobs: JobQueues,
}

impl Env {
    /// Returns the drawn record for `id`, if any was recorded this pass.
    #[must_use]
    pub fn drawn(&self, id: NodeId) -> Option<&DrawnAttrs> {
        self.drawn.get(&id)
    }

    /// Records the drawn repetition quantity for descriptor `id`.
    pub(crate) fn record_qty(&mut self, id: NodeId, qty: u64) {
        self.drawn.entry(id).or_default().qty = Some(qty);
    }

    /// Records the serialized (pre-codec) size for descriptor `id`.
    pub(crate) fn record_size(&mut self, id: NodeId, size: usize) {
        self.drawn.entry(id).or_default().size = Some(size);
    }

    /// Records the emitted (post-codec) size for descriptor `id`.
    pub(crate) fn record_encoded_size(&mut self, id: NodeId, size: usize) {
        self.drawn.entry(id).or_default().encoded_size = Some(size);
    }

    /// Replaces the whole drawn entry for `id`, returning the previous one.
    /// `None` removes the entry. Used by absorption rollback.
    pub(crate) fn swap_drawn(
        &mut self,
        id: NodeId,
        entry: Option<DrawnAttrs>,
    ) -> Option<DrawnAttrs> {
        match entry {
            Some(e) => self.drawn.insert(id, e),
            None => self.drawn.remove(&id),
        }
    }

    /// Clears the drawn record for `id` (unfreeze path).
    pub(crate) fn clear_drawn(&mut self, id: NodeId) {
        self.drawn.remove(&id);
    }

    /// Marks `id` exhausted for this pass.
    pub(crate) fn mark_exhausted(&mut self, id: NodeId) {
        self.exhausted.insert(id);
    }

    /// Unmarks `id` (reset / full unfreeze).
    pub(crate) fn clear_exhausted(&mut self, id: NodeId) {
        self.exhausted.remove(&id);
    }

    /// `true` when `id` has signalled exhaustion to the environment.
    #[must_use]
    pub fn is_marked_exhausted(&self, id: NodeId) -> bool {
        self.exhausted.contains(&id)
    }

    /// Installs a one-pass corruption hook for `id`, replacing any prior
    /// hook on the same identity.
    pub fn set_corrupt_hook(&mut self, id: NodeId, hook: CorruptHook) {
        self.corrupt.insert(id, hook);
    }

    /// Consumes the quantity hook for `id`, if one is installed.
    pub(crate) fn take_qty_hook(&mut self, id: NodeId) -> Option<u64> {
        if let Some(CorruptHook::Qty(q)) = self.corrupt.get(&id).copied() {
            self.corrupt.remove(&id);
            return Some(q);
        }
        None
    }

    /// Consumes the existence hook for `id`, if one is installed.
    pub(crate) fn take_existence_hook(&mut self, id: NodeId) -> Option<bool> {
        if let Some(CorruptHook::Existence(e)) = self.corrupt.get(&id).copied() {
            self.corrupt.remove(&id);
            return Some(e);
        }
        None
    }

    /// Consumes the synced-size hook for `id`, if one is installed.
    pub(crate) fn take_size_hook(&mut self, id: NodeId) -> Option<usize> {
        if let Some(CorruptHook::SyncSize(s)) = self.corrupt.get(&id).copied() {
            self.corrupt.remove(&id);
            return Some(s);
        }
        None
    }

    /// Copies the drawn/exhaustion records of every map key onto its
    /// mapped identity (subgraph cloning: the copies start with the same
    /// per-pass state as their originals).
    pub(crate) fn mirror_records(&mut self, map: &FxHashMap<NodeId, NodeId>) {
        for (old, new) in map {
            if let Some(d) = self.drawn.get(old).copied() {
                self.drawn.insert(*new, d);
            }
            if self.exhausted.contains(old) {
                self.exhausted.insert(*new);
            }
        }
    }

    /// A copy of this environment for a duplicated graph. Node identities
    /// are preserved by whole-graph duplication, so records carry over
    /// verbatim; pending jobs are intra-call state and never inherited.
    #[must_use]
    pub(crate) fn duplicated(&self) -> Self {
        Self {
            drawn: self.drawn.clone(),
            exhausted: self.exhausted.clone(),
            corrupt: self.corrupt.clone(),
            jobs: JobQueues::default(),
        }
    }
}
