// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deferred-resolution job queues.
//!
//! Single-pass recursive evaluation cannot resolve forward references: a
//! child whose existence depends on a sibling drawn later, or a generator
//! that must materialize only after the rest of its container. Such work is
//! parked as a job and drained — in ascending priority order, FIFO within a
//! priority — before the originating top-level call returns. Jobs are an
//! intra-call scheduling device, not concurrency.

use std::collections::BTreeMap;

use crate::ident::NodeId;
use crate::nonterm::ChildSpec;

/// Priority bucket for a deferred job. Lower values drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobPriority(pub u8);

impl JobPriority {
    /// Existence decisions for children whose governing sibling had not
    /// been drawn yet.
    pub const EXISTENCE: Self = Self(10);
    /// Size-sync patching of already-frozen integer fields.
    pub const SIZE_SYNC: Self = Self(15);
    /// Trigger-last generators, materialized after the rest of the
    /// container has been drawn.
    pub const GENERATOR: Self = Self(20);
}

/// A unit of deferred graph-mutation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Job {
    /// Decide whether the child described by `spec` exists inside `nt`'s
    /// frozen child list at position `slot`; materialize it in place or
    /// drop the placeholder, shifting later slots of the same container.
    PendingExistence {
        /// Container whose frozen child list holds the placeholder.
        nt: NodeId,
        /// Placeholder index within the frozen child list.
        slot: usize,
        /// Child descriptor to materialize or drop.
        spec: ChildSpec,
        /// Quantity the walk assigned before the decision was deferred.
        qty: u64,
    },
    /// Re-resolve a size sync for `node` now that sibling sizes have been
    /// recorded, and re-freeze its value.
    SizeSyncPatch {
        /// The size-carrying leaf to patch.
        node: NodeId,
    },
    /// Materialize a trigger-last generator now that its container has
    /// been fully drawn.
    TriggerLastGen {
        /// The generator node.
        node: NodeId,
    },
}

/// Priority-bucketed job queue owned by the environment.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobQueues {
    buckets: BTreeMap<JobPriority, Vec<Job>>,
}

impl JobQueues {
    /// Parks a job in its priority bucket.
    pub(crate) fn push(&mut self, prio: JobPriority, job: Job) {
        self.buckets.entry(prio).or_default().push(job);
    }

    /// Removes and returns every queued job, lowest priority first, FIFO
    /// within a priority.
    pub(crate) fn drain_all(&mut self) -> Vec<Job> {
        let buckets = std::mem::take(&mut self.buckets);
        buckets.into_values().flatten().collect()
    }

    /// `true` when no job is queued.
    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.values().all(Vec::is_empty)
    }

    /// Drops all queued jobs (absorption rollback; a rejected attempt must
    /// not leave work behind).
    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::NodeId;

    fn nid(i: usize) -> NodeId {
        NodeId::from_index(i)
    }

    #[test]
    fn drain_orders_by_priority_then_fifo() {
        let mut q = JobQueues::default();
        q.push(
            JobPriority::GENERATOR,
            Job::TriggerLastGen { node: nid(9) },
        );
        q.push(
            JobPriority::EXISTENCE,
            Job::PendingExistence {
                nt: nid(1),
                slot: 0,
                spec: ChildSpec::one(nid(2)),
                qty: 1,
            },
        );
        q.push(
            JobPriority::EXISTENCE,
            Job::PendingExistence {
                nt: nid(1),
                slot: 3,
                spec: ChildSpec::one(nid(4)),
                qty: 1,
            },
        );
        let jobs = q.drain_all();
        assert_eq!(jobs.len(), 3);
        assert!(matches!(jobs[0], Job::PendingExistence { slot: 0, .. }));
        assert!(matches!(jobs[1], Job::PendingExistence { slot: 3, .. }));
        assert!(matches!(jobs[2], Job::TriggerLastGen { .. }));
        assert!(q.is_empty());
    }
}
