// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Container generation: shape realization and child expansion.
//!
//! One expansion realizes one structural variant of a container: the walk
//! planned in [`crate::nonterm`] supplies per-child quantities; corruption
//! hooks, quantity syncs, and existence conditions override them; child
//! instances are materialized (first instance reuses the descriptor,
//! further instances clone or alias it), separators are interposed, and
//! drawn quantities/sizes are recorded into the environment for sibling
//! sync lookups. A child whose existence cannot be decided yet is parked
//! as a placeholder and a deferred job decides it before the top-level
//! freeze returns.

use rand::seq::SliceRandom;
use rustc_hash::FxHashSet;
use tracing::warn;

use crate::attrs::Attr;
use crate::contents::ContentsKind;
use crate::graph::{CloneOpts, EntanglePolicy, Graph};
use crate::ident::NodeId;
use crate::jobs::{Job, JobPriority};
use crate::nonterm::{
    ChildSpec, DupMode, FragmentKind, FrozenForm, PlannedChild, SeparatorSpec, WalkMode,
};
use crate::sync::{cond_holds, resolve_quantity};

impl Graph {
    pub(crate) fn freeze_nonterm(&mut self, id: NodeId) -> Vec<u8> {
        let has_frozen = matches!(
            &self.node(id).contents().kind,
            ContentsKind::NonTerm(nt) if nt.frozen.is_some()
        );
        if !has_frozen {
            self.expand_nonterm(id);
        }
        self.nt_bytes(id)
    }

    fn walk_mode(&self, id: NodeId) -> WalkMode {
        let c = self.node(id).contents();
        if c.has_attr(Attr::Determinist) {
            WalkMode::Determinist
        } else if c.has_attr(Attr::Finite) {
            WalkMode::FiniteRandom
        } else {
            WalkMode::FreeRandom
        }
    }

    /// Realizes the next structural variant of container `id`.
    pub(crate) fn expand_nonterm(&mut self, id: NodeId) {
        self.expansion_depth += 1;
        let mode = self.walk_mode(id);
        let (plan, separator) = {
            let Self { nodes, rng, .. } = self;
            let c = nodes[id.index()].contents_mut();
            match &mut c.kind {
                ContentsKind::NonTerm(nt) => (nt.plan(mode, rng), nt.separator),
                _ => (None, None),
            }
        };
        let Some(plan) = plan else {
            if let ContentsKind::NonTerm(nt) = &mut self.node_mut(id).contents_mut().kind {
                nt.frozen = Some(FrozenForm::default());
            }
            self.expansion_depth -= 1;
            return;
        };

        let order = self.expansion_order(&plan, mode);
        let mut children: Vec<NodeId> = Vec::new();
        let mut pending: Vec<usize> = Vec::new();
        let mut used_first: FxHashSet<NodeId> = FxHashSet::default();
        let mut emitted_any = false;

        for idx in order {
            let pc = plan[idx];
            match self.decide_existence(pc.spec.node) {
                Existence::Suppressed => {
                    self.env.record_qty(pc.spec.node, 0);
                    if let Some(sep) = separator.filter(|s| s.always) {
                        self.emit_separator(&sep, &mut children);
                        emitted_any = true;
                    }
                    continue;
                }
                Existence::Undecided => {
                    // Park a placeholder: the deferred job materializes or
                    // drops it once the governing sibling has been drawn.
                    pending.push(children.len());
                    children.push(pc.spec.node);
                    self.env.jobs.push(
                        JobPriority::EXISTENCE,
                        Job::PendingExistence {
                            nt: id,
                            slot: children.len() - 1,
                            spec: pc.spec,
                            qty: pc.qty,
                        },
                    );
                    continue;
                }
                Existence::Present => {}
            }

            let qty = self.decide_qty(&pc);
            if qty == 0 {
                self.env.record_qty(pc.spec.node, 0);
                if let Some(sep) = separator.filter(|s| s.always) {
                    self.emit_separator(&sep, &mut children);
                    emitted_any = true;
                }
                continue;
            }

            let mut size_sum = 0_usize;
            for k in 0..qty {
                if let Some(sep) = separator {
                    if sep.prefix {
                        self.emit_separator(&sep, &mut children);
                    } else if !sep.suffix && emitted_any {
                        self.emit_separator(&sep, &mut children);
                    }
                }
                let instance = self.materialize(pc.spec, k, &mut used_first);
                let bytes = self.freeze_rec(instance);
                size_sum += bytes.len();
                children.push(instance);
                emitted_any = true;
                if let Some(sep) = separator {
                    if !sep.prefix && sep.suffix {
                        self.emit_separator(&sep, &mut children);
                    }
                }
            }
            self.env.record_qty(pc.spec.node, qty);
            let prior_size = self.env.drawn(pc.spec.node).and_then(|d| d.size);
            if prior_size.is_none() {
                self.env.record_size(pc.spec.node, size_sum);
            }
            self.env.record_encoded_size(pc.spec.node, size_sum);
        }

        let exhausted = {
            let c = self.node_mut(id).contents_mut();
            if let ContentsKind::NonTerm(nt) = &mut c.kind {
                nt.frozen = Some(FrozenForm { children, pending });
                nt.is_exhausted()
            } else {
                false
            }
        };
        if exhausted {
            self.env.mark_exhausted(id);
        }
        self.expansion_depth -= 1;
    }

    /// Emission order: definition order, except that randomly interleaved
    /// fragments shuffle their children among themselves in random modes.
    fn expansion_order(&mut self, plan: &[PlannedChild], mode: WalkMode) -> Vec<usize> {
        let mut order: Vec<usize> = (0..plan.len()).collect();
        if mode == WalkMode::Determinist {
            return order;
        }
        let random_slots: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| plan[i].frag_kind == FragmentKind::Random)
            .collect();
        if random_slots.len() > 1 {
            let mut shuffled = random_slots.clone();
            shuffled.shuffle(&mut self.rng);
            for (slot, new_idx) in random_slots.iter().zip(shuffled) {
                order[*slot] = new_idx;
            }
        }
        order
    }

    pub(crate) fn decide_existence(&mut self, child: NodeId) -> Existence {
        if let Some(forced) = self.env.take_existence_hook(child) {
            return if forced {
                Existence::Present
            } else {
                Existence::Suppressed
            };
        }
        let syncs = self.node(child).contents().meta.syncs.clone();
        if syncs.existence.is_none() && syncs.inexistence.is_none() {
            return Existence::Present;
        }
        let value_of = |t: NodeId| self.value_bytes(t);
        let mut undecided = false;
        if let Some(cond) = &syncs.existence {
            match cond_holds(&self.env, cond, &value_of) {
                Some(false) => return Existence::Suppressed,
                Some(true) => {}
                None => undecided = true,
            }
        }
        if let Some(cond) = &syncs.inexistence {
            match cond_holds(&self.env, cond, &value_of) {
                Some(true) => return Existence::Suppressed,
                Some(false) => {}
                None => undecided = true,
            }
        }
        if undecided {
            Existence::Undecided
        } else {
            Existence::Present
        }
    }

    pub(crate) fn decide_qty(&mut self, pc: &PlannedChild) -> u64 {
        if let Some(forced) = self.env.take_qty_hook(pc.spec.node) {
            return forced;
        }
        let syncs = self.node(pc.spec.node).contents().meta.syncs.clone();
        let sync = syncs.qty.or(syncs.qty_from);
        if let Some(sync) = sync {
            if let Some(q) = resolve_quantity(&self.env, &sync, |t| self.value_u64(t)) {
                return q;
            }
        }
        pc.qty
    }

    /// Materializes the `k`-th instance of a child descriptor.
    ///
    /// The first instance reuses the descriptor node itself when it has not
    /// been placed yet this cycle; later instances are clones (copy mode)
    /// or the same node repeated (reuse mode).
    pub(crate) fn materialize(
        &mut self,
        spec: ChildSpec,
        k: u64,
        used_first: &mut FxHashSet<NodeId>,
    ) -> NodeId {
        if k == 0 && used_first.insert(spec.node) {
            return spec.node;
        }
        match spec.dup {
            DupMode::Reuse => spec.node,
            DupMode::Copy => self
                .clone_node(
                    spec.node,
                    &CloneOpts {
                        entangle: EntanglePolicy::AcceptExternal,
                        ..CloneOpts::default()
                    },
                )
                .unwrap_or_else(|err| {
                    warn!(node = %spec.node, %err, "instance clone failed; aliasing descriptor");
                    spec.node
                }),
        }
    }

    fn emit_separator(&mut self, sep: &SeparatorSpec, children: &mut Vec<NodeId>) {
        let instance = if sep.unique {
            self.clone_node(
                sep.node,
                &CloneOpts {
                    entangle: EntanglePolicy::AcceptExternal,
                    ..CloneOpts::default()
                },
            )
            .unwrap_or(sep.node)
        } else {
            sep.node
        };
        let _ = self.freeze_rec(instance);
        children.push(instance);
    }

    /// Serializes a container's realized child list, applying the codec
    /// and recording the container's own sizes for size-sync consumers.
    pub(crate) fn nt_bytes(&mut self, id: NodeId) -> Vec<u8> {
        let (children, pending) = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => match &nt.frozen {
                Some(f) => (f.children.clone(), f.pending.clone()),
                None => (Vec::new(), Vec::new()),
            },
            _ => (Vec::new(), Vec::new()),
        };
        let mut buf = Vec::new();
        for (i, child) in children.iter().enumerate() {
            if pending.contains(&i) {
                continue;
            }
            buf.extend(self.freeze_rec(*child));
        }
        self.env.record_size(id, buf.len());
        let out = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt.codec.as_ref().map(|c| c.encode(&buf)),
            _ => None,
        };
        let out = out.unwrap_or(buf);
        self.env.record_encoded_size(id, out.len());
        out
    }

    /// Decides a parked existence placeholder: materializes the child in
    /// place or drops it, shifting later placeholder slots of the same
    /// container.
    pub(crate) fn run_pending_existence(
        &mut self,
        nt_id: NodeId,
        slot: usize,
        spec: ChildSpec,
        qty: u64,
    ) {
        let decision = match self.decide_existence(spec.node) {
            Existence::Present => true,
            Existence::Suppressed => false,
            Existence::Undecided => {
                // Still undecidable after the container was fully drawn:
                // the child is permanently dropped for this realization.
                warn!(node = %spec.node, "existence condition stayed unresolvable; dropping child");
                false
            }
        };

        let mut instances: Vec<NodeId> = Vec::new();
        let mut size_sum = 0_usize;
        if decision {
            let qty = self.decide_qty(&PlannedChild {
                spec,
                qty,
                frag_kind: FragmentKind::Ordered,
            });
            for k in 0..qty {
                let mut used = FxHashSet::default();
                let instance = if k == 0 {
                    spec.node
                } else {
                    self.materialize(spec, k, &mut used)
                };
                size_sum += self.freeze_rec(instance).len();
                instances.push(instance);
            }
        }
        self.env.record_qty(spec.node, u64::try_from(instances.len()).unwrap_or(u64::MAX));
        self.env.record_size(spec.node, size_sum);
        self.env.record_encoded_size(spec.node, size_sum);

        let ContentsKind::NonTerm(nt) = &mut self.node_mut(nt_id).contents_mut().kind else {
            return;
        };
        let Some(frozen) = nt.frozen.as_mut() else {
            return;
        };
        if slot >= frozen.children.len() {
            return;
        }
        let added = instances.len();
        frozen.children.splice(slot..=slot, instances);
        frozen.pending.retain(|&s| s != slot);
        for s in &mut frozen.pending {
            if *s > slot {
                // Later placeholders shift by the net change at this slot.
                *s = *s + added - 1;
            }
        }
    }
}

/// Resolution of a child's existence condition during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Existence {
    /// The child exists this pass.
    Present,
    /// The child is suppressed (effective quantity zero).
    Suppressed,
    /// The governing sibling has not been drawn yet.
    Undecided,
}
