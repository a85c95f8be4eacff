// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Absorption: grammar-directed backtracking parse of a byte blob.
//!
//! Shapes are tried heaviest-first; inside a shape, ordered fragments match
//! children greedily within their quantity bounds, pick fragments try their
//! entries by weight, and random fragments run round-based matching where a
//! child rejected this round may succeed after others consumed bytes.
//!
//! Every fallible sub-match runs against its own transaction log; a failed
//! attempt rolls its provisional state back (value-type reverts, memoized
//! values, drawn-attr records) before the next alternative is tried, and a
//! successful sub-match merges its log upward. Only a fully successful
//! top-level absorb commits, fanning `do_cleanup_absorb` out to every
//! provisionally absorbed leaf — two-phase commit across the whole
//! recursive call tree, leaving no observable mutation behind a rejection.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::attrs::Attr;
use crate::contents::ContentsKind;
use crate::csts::{AbsCsts, AbsorbHints, AbsorbOutcome, AbsorbStatus};
use crate::env::DrawnAttrs;
use crate::graph::Graph;
use crate::ident::NodeId;
use crate::nonterm::{ChildSpec, FragmentKind, FrozenForm, SeparatorSpec, Shape};
use crate::sync::resolve_quantity;

/// One provisional mutation recorded during an absorption attempt.
#[derive(Debug)]
pub(crate) enum TxEntry {
    /// A leaf value type holds tentative absorbed state.
    Leaf(NodeId),
    /// `meta.saved_frozen` on this node holds the pre-attempt memo.
    MetaFrozen(NodeId),
    /// `saved_frozen` on this container holds the pre-attempt frozen form.
    NtFrozen(NodeId),
    /// The drawn-attrs entry for this identity was replaced.
    Drawn {
        /// Affected identity.
        node: NodeId,
        /// Pre-attempt entry (absent when none existed).
        prev: Option<DrawnAttrs>,
    },
}

/// Transaction log for one absorption attempt.
#[derive(Debug, Default)]
pub(crate) struct TxLog {
    entries: Vec<TxEntry>,
}

impl TxLog {
    pub(crate) fn merge(&mut self, child: TxLog) {
        self.entries.extend(child.entries);
    }
}

/// Postponed child parked at a structural level, waiting for the next
/// sibling to anchor its end boundary.
#[derive(Debug, Clone, Copy)]
struct Pending {
    spec: ChildSpec,
    start: usize,
    child_index: usize,
}

impl Graph {
    /// Parses `blob` against node `id` under the given constraints.
    ///
    /// Returns `FullyAbsorbed` when the whole blob was consumed, `Absorbed`
    /// for a proper prefix match, `Rejected` otherwise — with the full
    /// rollback guarantee: a rejection leaves graph and environment
    /// byte-identical to their pre-call state.
    pub fn absorb(&mut self, id: NodeId, blob: &[u8], csts: AbsCsts) -> AbsorbOutcome {
        let mut log = TxLog::default();
        let mut out = self.absorb_node(id, blob, csts, &AbsorbHints::default(), &mut log);
        if out.accepted() {
            self.tx_commit(log);
            if out.end() == blob.len() {
                out.status = AbsorbStatus::FullyAbsorbed;
            }
        } else {
            self.tx_rollback(log);
        }
        // Absorption never leaves deferred work behind.
        self.env.jobs.clear();
        out
    }

    /// Absorbs one node, guaranteeing that a rejection leaves the parent
    /// log untouched and all local provisional state rolled back.
    pub(crate) fn absorb_node(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        hints: &AbsorbHints,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let csts = self.node(id).contents().meta.abs_csts.unwrap_or(csts);
        let mut local = TxLog::default();
        let out = self.absorb_node_inner(id, blob, csts, hints, &mut local);
        if out.accepted() {
            log.merge(local);
        } else {
            self.tx_rollback(local);
        }
        out
    }

    fn absorb_node_inner(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        hints: &AbsorbHints,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        enum K {
            Empty,
            Typed,
            Func,
            Gen,
            NonTerm,
        }
        let kind = match &self.node(id).contents().kind {
            ContentsKind::Empty => K::Empty,
            ContentsKind::Typed(_) => K::Typed,
            ContentsKind::Func(_) => K::Func,
            ContentsKind::Gen(_) => K::Gen,
            ContentsKind::NonTerm(_) => K::NonTerm,
        };
        match kind {
            K::Empty => AbsorbOutcome::absorbed(0, 0),
            K::Typed => self.absorb_typed(id, blob, csts, hints, log),
            K::Func => self.absorb_func(id, blob, csts, log),
            K::Gen => self.absorb_gen(id, blob, csts, hints, log),
            K::NonTerm => self.absorb_nonterm(id, blob, csts, log),
        }
    }

    fn absorb_typed(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        hints: &AbsorbHints,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let verdict = {
            let ContentsKind::Typed(t) = &self.node(id).contents().kind else {
                return AbsorbOutcome::reject();
            };
            // Plugin panic boundary: a crashing helper rejects instead of
            // unwinding through the engine.
            catch_unwind(AssertUnwindSafe(|| {
                t.vt.absorb_auto_helper(blob, csts, hints)
            }))
            .unwrap_or_else(|_| {
                warn!(node = %id, "value-type absorb helper panicked; rejecting");
                AbsorbOutcome::reject()
            })
        };
        if !verdict.accepted() {
            return AbsorbOutcome::reject();
        }
        if verdict.offset > 0 && !hints.scan_ahead {
            return AbsorbOutcome::reject();
        }
        if verdict.end() > blob.len() {
            warn!(node = %id, "value-type helper overran the blob; rejecting");
            return AbsorbOutcome::reject();
        }
        let c = self.node_mut(id).contents_mut();
        if c.meta.saved_frozen.is_none() {
            c.meta.saved_frozen = Some(c.meta.frozen.take());
            log.entries.push(TxEntry::MetaFrozen(id));
        }
        let ContentsKind::Typed(t) = &mut c.kind else {
            return AbsorbOutcome::reject();
        };
        let bytes = t.vt.do_absorb(blob, verdict.offset, verdict.size);
        c.meta.frozen = Some(bytes);
        log.entries.push(TxEntry::Leaf(id));
        verdict
    }

    fn absorb_func(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let expected = self.compute_func_value(id);
        if blob.len() < expected.len() {
            return AbsorbOutcome::reject();
        }
        if csts.contents() && blob[..expected.len()] != expected[..] {
            return AbsorbOutcome::reject();
        }
        let taken = blob[..expected.len()].to_vec();
        let c = self.node_mut(id).contents_mut();
        if c.meta.saved_frozen.is_none() {
            c.meta.saved_frozen = Some(c.meta.frozen.take());
            log.entries.push(TxEntry::MetaFrozen(id));
        }
        let len = taken.len();
        c.meta.frozen = Some(taken);
        AbsorbOutcome::absorbed(0, len)
    }

    fn absorb_gen(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        hints: &AbsorbHints,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let produced = match &self.node(id).contents().kind {
            ContentsKind::Gen(g) => g.produced,
            _ => return AbsorbOutcome::reject(),
        };
        let root = produced.unwrap_or_else(|| self.run_generator(id));
        self.absorb_node(root, blob, csts, hints, log)
    }

    fn absorb_nonterm(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let codec = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt.codec.clone(),
            _ => return AbsorbOutcome::reject(),
        };
        if let Some(codec) = codec {
            // Determine how many leading bytes belong to the encoded
            // region, exactly when the codec can tell, else best-effort.
            if let Some(region) = codec.how_much_can_be_consumed(blob) {
                let region = region.min(blob.len());
                let Some(decoded) = codec.decode(&blob[..region]) else {
                    return AbsorbOutcome::reject();
                };
                let inner = self.absorb_nt_shapes(id, &decoded, csts, log);
                if inner.accepted() && inner.end() == decoded.len() {
                    return AbsorbOutcome::absorbed(0, region);
                }
                return AbsorbOutcome::reject();
            }
            let Some(decoded) = codec.decode(blob) else {
                return AbsorbOutcome::reject();
            };
            let inner = self.absorb_nt_shapes(id, &decoded, csts, log);
            // Post-decode size must line up with what the shape consumed.
            if inner.accepted() && inner.end() == decoded.len() {
                return AbsorbOutcome::absorbed(0, blob.len());
            }
            return AbsorbOutcome::reject();
        }
        self.absorb_nt_shapes(id, blob, csts, log)
    }

    fn absorb_nt_shapes(
        &mut self,
        id: NodeId,
        blob: &[u8],
        csts: AbsCsts,
        log: &mut TxLog,
    ) -> AbsorbOutcome {
        let order = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt.shapes_by_weight(),
            _ => return AbsorbOutcome::reject(),
        };
        for shape_idx in order {
            let mut shape_log = TxLog::default();
            match self.try_shape(id, shape_idx, blob, csts, &mut shape_log) {
                Some((children, consumed)) => {
                    log.merge(shape_log);
                    let ContentsKind::NonTerm(nt) =
                        &mut self.node_mut(id).contents_mut().kind
                    else {
                        return AbsorbOutcome::reject();
                    };
                    if nt.saved_frozen.is_none() {
                        nt.saved_frozen = Some(nt.frozen.take());
                        log.entries.push(TxEntry::NtFrozen(id));
                    }
                    nt.frozen = Some(FrozenForm {
                        children,
                        pending: Vec::new(),
                    });
                    return AbsorbOutcome::absorbed(0, consumed);
                }
                None => {
                    debug!(node = %id, shape = shape_idx, "shape rejected; backtracking");
                    self.tx_rollback(shape_log);
                }
            }
        }
        AbsorbOutcome::reject()
    }

    #[allow(clippy::too_many_lines)]
    fn try_shape(
        &mut self,
        id: NodeId,
        shape_idx: usize,
        blob: &[u8],
        csts: AbsCsts,
        log: &mut TxLog,
    ) -> Option<(Vec<NodeId>, usize)> {
        let (shape, separator) = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => {
                (nt.shapes.get(shape_idx)?.clone(), nt.separator)
            }
            _ => return None,
        };
        let mut st = ShapeMatch {
            blob,
            csts,
            pos: 0,
            children: Vec::new(),
            used_first: FxHashSet::default(),
            pending: None,
            emitted_any: false,
            separator,
            shape: &shape,
        };
        for frag in &shape.fragments {
            match frag.kind {
                FragmentKind::Ordered => {
                    for spec in &frag.entries {
                        if !self.absorb_entry(*spec, &mut st, log) {
                            return None;
                        }
                    }
                }
                FragmentKind::Pick => {
                    if !self.absorb_pick(&frag.entries, &mut st, log) {
                        return None;
                    }
                }
                FragmentKind::Random => {
                    if !self.absorb_random(&frag.entries, &mut st, log) {
                        return None;
                    }
                }
            }
        }
        // A postponed child with no later sibling anchors against the
        // remaining bytes directly.
        if let Some(p) = st.pending.take() {
            let mut local = TxLog::default();
            let instance = self.instance_for(p.spec, 0, &mut st.used_first);
            let hints = AbsorbHints::default();
            let out = self.absorb_node(instance, &blob[st.pos..], csts, &hints, &mut local);
            if !out.accepted() || out.offset != 0 {
                self.tx_rollback(local);
                return None;
            }
            log.merge(local);
            st.children.insert(p.child_index.min(st.children.len()), instance);
            st.pos += out.size;
            self.record_entry_drawn(p.spec.node, 1, out.size, log);
        }
        Some((st.children, st.pos))
    }

    /// Matches one ordered-fragment entry: existence, quantity bounds,
    /// separators, postponement, greedy repetition.
    fn absorb_entry(&mut self, spec: ChildSpec, st: &mut ShapeMatch<'_>, log: &mut TxLog) -> bool {
        let blob = st.blob;
        match self.decide_existence(spec.node) {
            crate::expand::Existence::Present => {}
            crate::expand::Existence::Suppressed | crate::expand::Existence::Undecided => {
                self.record_entry_drawn(spec.node, 0, 0, log);
                if st.separator.is_some_and(|s| s.always) {
                    // The "always" policy injects a separator even for a
                    // suppressed child.
                    let matched = self.absorb_separator(st, log);
                    return matched || !st.csts.structure();
                }
                return true;
            }
        }

        if self.has_attr(spec.node, Attr::AbsPostpone) {
            if st.pending.is_some() {
                // At most one postponed node may be pending per level.
                return false;
            }
            st.pending = Some(Pending {
                spec,
                start: st.pos,
                child_index: st.children.len(),
            });
            return true;
        }

        let (min, max) = self.absorb_bounds(&spec, st.csts);
        let mut count: u64 = 0;
        let mut consumed_sum = 0_usize;
        while count < max {
            let mut local = TxLog::default();
            let pos_before = st.pos;
            let children_before = st.children.len();
            let sep_needed = st.separator.is_some_and(|s| s.prefix)
                || (st.separator.is_some_and(|s| !s.prefix && !s.suffix) && st.emitted_any);
            if sep_needed && !self.absorb_separator_logged(st, &mut local) {
                self.tx_rollback(local);
                st.children.truncate(children_before);
                st.pos = pos_before;
                break;
            }
            let instance = self.instance_for(spec, count, &mut st.used_first);
            let hints = AbsorbHints {
                expected_size: self.inverse_size_hint(st.shape, spec.node),
                scan_ahead: st.pending.is_some(),
            };
            let out = self.absorb_node(instance, &blob[st.pos..], st.csts, &hints, &mut local);
            if !out.accepted() {
                self.tx_rollback(local);
                st.children.truncate(children_before);
                st.pos = pos_before;
                break;
            }
            if out.offset > 0 && st.pending.is_none() {
                // Scanning without a pending postponed sibling is a
                // structural violation.
                self.tx_rollback(local);
                st.children.truncate(children_before);
                st.pos = pos_before;
                break;
            }
            if let Some(p) = st.pending.take() {
                // This sibling anchored: the postponed node absorbs exactly
                // the slice between its own start and the anchor offset.
                let gap = &blob[p.start..st.pos + out.offset];
                if !self.resolve_postponed(&p, gap, st, &mut local) {
                    self.tx_rollback(local);
                    st.children.truncate(children_before);
                    st.pos = pos_before;
                    return false;
                }
            }
            log.merge(local);
            st.pos += out.end();
            consumed_sum += out.size;
            st.children.push(instance);
            st.emitted_any = true;
            count += 1;
            if st.separator.is_some_and(|s| !s.prefix && s.suffix) {
                let mut sep_log = TxLog::default();
                if self.absorb_separator_logged(st, &mut sep_log) {
                    log.merge(sep_log);
                } else {
                    self.tx_rollback(sep_log);
                }
            }
            if out.end() == 0 {
                // A zero-size match cannot make progress; one instance is
                // enough, repeating it would loop forever.
                break;
            }
        }
        if count < min && st.csts.structure() {
            return false;
        }
        self.record_entry_drawn(spec.node, count, consumed_sum, log);
        true
    }

    /// Tries a pick fragment's entries heaviest-first; exactly one must
    /// match.
    fn absorb_pick(
        &mut self,
        entries: &[ChildSpec],
        st: &mut ShapeMatch<'_>,
        log: &mut TxLog,
    ) -> bool {
        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&i| core::cmp::Reverse(entries[i].weight));
        for i in order {
            let mut trial = TxLog::default();
            let pos_before = st.pos;
            let children_before = st.children.len();
            let emitted_before = st.emitted_any;
            let used_before = st.used_first.clone();
            if self.absorb_entry(entries[i], st, &mut trial) {
                log.merge(trial);
                return true;
            }
            self.tx_rollback(trial);
            st.pos = pos_before;
            st.children.truncate(children_before);
            st.emitted_any = emitted_before;
            st.used_first = used_before;
        }
        false
    }

    /// Round-based matching for randomly interleaved fragments: each round
    /// offers every unsatisfied child one instance against the remaining
    /// bytes; no progress across a full round ends the fragment.
    fn absorb_random(
        &mut self,
        entries: &[ChildSpec],
        st: &mut ShapeMatch<'_>,
        log: &mut TxLog,
    ) -> bool {
        let bounds: Vec<(u64, u64)> = entries
            .iter()
            .map(|s| self.absorb_bounds(s, st.csts))
            .collect();
        let mut counts = vec![0_u64; entries.len()];
        let mut sums = vec![0_usize; entries.len()];
        let mut zero_done = vec![false; entries.len()];
        loop {
            let mut progressed = false;
            for (i, spec) in entries.iter().enumerate() {
                if counts[i] >= bounds[i].1 || zero_done[i] {
                    continue;
                }
                let mut trial = TxLog::default();
                let instance = self.instance_for(*spec, counts[i], &mut st.used_first);
                let hints = AbsorbHints::default();
                let out =
                    self.absorb_node(instance, &st.blob[st.pos..], st.csts, &hints, &mut trial);
                if out.accepted() && out.offset == 0 {
                    log.merge(trial);
                    st.pos += out.size;
                    sums[i] += out.size;
                    st.children.push(instance);
                    st.emitted_any = true;
                    counts[i] += 1;
                    if out.size == 0 {
                        // Zero-size matches satisfy the child but cannot
                        // drive further rounds.
                        zero_done[i] = true;
                    } else {
                        progressed = true;
                    }
                } else {
                    self.tx_rollback(trial);
                }
            }
            if !progressed {
                break;
            }
        }
        for (i, spec) in entries.iter().enumerate() {
            if counts[i] < bounds[i].0 && st.csts.structure() {
                return false;
            }
            self.record_entry_drawn(spec.node, counts[i], sums[i], log);
        }
        true
    }

    fn resolve_postponed(
        &mut self,
        p: &Pending,
        gap: &[u8],
        st: &mut ShapeMatch<'_>,
        log: &mut TxLog,
    ) -> bool {
        let instance = self.instance_for(p.spec, 0, &mut st.used_first);
        let hints = AbsorbHints::default();
        let out = self.absorb_node(instance, gap, st.csts, &hints, log);
        // The postponed node must cover exactly the gap slice; any
        // inconsistency between the two aborts the attempt.
        if !out.accepted() || out.offset != 0 || out.size != gap.len() {
            debug!(node = %p.spec.node, "postponed node did not cover its gap; aborting");
            return false;
        }
        st.children
            .insert(p.child_index.min(st.children.len()), instance);
        self.record_entry_drawn(p.spec.node, 1, gap.len(), log);
        true
    }

    fn absorb_separator(&mut self, st: &mut ShapeMatch<'_>, log: &mut TxLog) -> bool {
        let mut local = TxLog::default();
        if self.absorb_separator_logged(st, &mut local) {
            log.merge(local);
            true
        } else {
            self.tx_rollback(local);
            false
        }
    }

    fn absorb_separator_logged(&mut self, st: &mut ShapeMatch<'_>, log: &mut TxLog) -> bool {
        let Some(sep) = st.separator else {
            return true;
        };
        let instance = if sep.unique {
            self.instance_for(ChildSpec::one(sep.node), 1, &mut st.used_first)
        } else {
            sep.node
        };
        let hints = AbsorbHints::default();
        let out = self.absorb_node(instance, &st.blob[st.pos..], st.csts, &hints, log);
        if out.accepted() && out.offset == 0 {
            st.pos += out.size;
            st.children.push(instance);
            true
        } else {
            false
        }
    }

    /// Quantity bounds for absorption: corruption hooks and quantity syncs
    /// pin the count exactly; the structure constraint being off lifts the
    /// minimum.
    fn absorb_bounds(&mut self, spec: &ChildSpec, csts: AbsCsts) -> (u64, u64) {
        if let Some(forced) = self.env.take_qty_hook(spec.node) {
            return (forced, forced);
        }
        let syncs = self.node(spec.node).contents().meta.syncs.clone();
        if let Some(sync) = syncs.qty.or(syncs.qty_from) {
            if let Some(q) = resolve_quantity(&self.env, &sync, |t| self.value_u64(t)) {
                return (q, q);
            }
        }
        let min = if csts.structure() { spec.min } else { 0 };
        (min, spec.max)
    }

    /// Derives an expected byte size for `child` from a sibling whose size
    /// sync targets it and whose value was already absorbed.
    fn inverse_size_hint(&self, shape: &Shape, child: NodeId) -> Option<usize> {
        for frag in &shape.fragments {
            for entry in &frag.entries {
                let syncs = &self.node(entry.node).contents().meta.syncs;
                let Some(size_sync) = &syncs.size else {
                    continue;
                };
                if size_sync.target != child {
                    continue;
                }
                if self.env.drawn(entry.node).is_none() {
                    continue;
                }
                let value = self.value_u64(entry.node)?;
                let adjusted = i64::try_from(value).ok()?.saturating_sub(size_sync.base);
                return usize::try_from(adjusted.max(0)).ok();
            }
        }
        None
    }

    fn instance_for(
        &mut self,
        spec: ChildSpec,
        k: u64,
        used_first: &mut FxHashSet<NodeId>,
    ) -> NodeId {
        self.materialize(spec, k, used_first)
    }

    fn record_entry_drawn(&mut self, node: NodeId, qty: u64, size: usize, log: &mut TxLog) {
        let prev = self.env.drawn(node).copied();
        log.entries.push(TxEntry::Drawn { node, prev });
        self.env.record_qty(node, qty);
        self.env.record_size(node, size);
        self.env.record_encoded_size(node, size);
    }

    // ── Two-phase commit ────────────────────────────────────────────────

    pub(crate) fn tx_rollback(&mut self, log: TxLog) {
        for entry in log.entries.into_iter().rev() {
            match entry {
                TxEntry::Leaf(id) => {
                    if let ContentsKind::Typed(t) = &mut self.node_mut(id).contents_mut().kind {
                        t.vt.do_revert_absorb();
                    }
                }
                TxEntry::MetaFrozen(id) => {
                    let c = self.node_mut(id).contents_mut();
                    if let Some(prev) = c.meta.saved_frozen.take() {
                        c.meta.frozen = prev;
                    }
                }
                TxEntry::NtFrozen(id) => {
                    if let ContentsKind::NonTerm(nt) =
                        &mut self.node_mut(id).contents_mut().kind
                    {
                        if let Some(prev) = nt.saved_frozen.take() {
                            nt.frozen = prev;
                        }
                    }
                }
                TxEntry::Drawn { node, prev } => {
                    let _ = self.env.swap_drawn(node, prev);
                }
            }
        }
    }

    pub(crate) fn tx_commit(&mut self, log: TxLog) {
        for entry in log.entries {
            match entry {
                TxEntry::Leaf(id) => {
                    if let ContentsKind::Typed(t) = &mut self.node_mut(id).contents_mut().kind {
                        t.vt.do_cleanup_absorb();
                    }
                }
                TxEntry::MetaFrozen(id) => {
                    self.node_mut(id).contents_mut().meta.saved_frozen = None;
                }
                TxEntry::NtFrozen(id) => {
                    if let ContentsKind::NonTerm(nt) =
                        &mut self.node_mut(id).contents_mut().kind
                    {
                        nt.saved_frozen = None;
                    }
                }
                TxEntry::Drawn { .. } => {}
            }
        }
    }
}

/// Mutable state threaded through one shape-match attempt.
struct ShapeMatch<'a> {
    blob: &'a [u8],
    csts: AbsCsts,
    pos: usize,
    children: Vec<NodeId>,
    used_first: FxHashSet<NodeId>,
    pending: Option<Pending>,
    emitted_any: bool,
    separator: Option<SeparatorSpec>,
    shape: &'a Shape,
}
