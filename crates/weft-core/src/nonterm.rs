// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Structural (non-terminal) container model and variant walker.
//!
//! A container holds a weighted list of *shapes* (alternative arrangements
//! of its children). Each shape is a sequence of fragments: ordered
//! ("all in sequence"), random ("randomly interleaved"), or pick ("exactly
//! one of N by weight"). Each fragment entry references a child descriptor
//! with a `[min, max]` repetition range and an optional default.
//!
//! Deterministic variant enumeration is a three-level odometer:
//! 1. the quantity walk (this module's [`WalkState`]) crosses the per-child
//!    quantity sequences,
//! 2. when it exhausts, the pick cursors advance one position,
//! 3. when those exhaust, the current shape is excluded and the next
//!    heaviest shape is selected.
//! The container is fully exhausted only when all three levels are
//! exhausted simultaneously; the next freeze wraps around and starts over.
//!
//! Ordering invariant: quantity sequences are built as `[max, default, min]`
//! (deduplicated, the default always present) and consumed back-to-front,
//! so the minimum quantity is realized first in deterministic mode.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::Rng;

use crate::codec::Codec;
use crate::ident::NodeId;

/// How repeated instances of one child descriptor are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DupMode {
    /// Instances beyond the first are independent clones.
    #[default]
    Copy,
    /// The same node object is appended repeatedly (aliased in place).
    Reuse,
}

/// One child descriptor inside a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSpec {
    /// The child descriptor node.
    pub node: NodeId,
    /// Minimum repetition count.
    pub min: u64,
    /// Maximum repetition count.
    pub max: u64,
    /// Preferred repetition count; defaults to `max` when unset.
    pub default: Option<u64>,
    /// Duplication mode for instances beyond the first.
    pub dup: DupMode,
    /// Selection weight inside a pick fragment (ignored elsewhere).
    pub weight: u32,
}

impl ChildSpec {
    /// A child appearing exactly once.
    #[must_use]
    pub fn one(node: NodeId) -> Self {
        Self::ranged(node, 1, 1)
    }

    /// A child repeated between `min` and `max` times.
    #[must_use]
    pub fn ranged(node: NodeId, min: u64, max: u64) -> Self {
        Self {
            node,
            min,
            max,
            default: None,
            dup: DupMode::Copy,
            weight: 1,
        }
    }

    /// Sets the preferred repetition count.
    #[must_use]
    pub fn with_default(mut self, default: u64) -> Self {
        self.default = Some(default);
        self
    }

    /// Sets the duplication mode.
    #[must_use]
    pub fn with_dup(mut self, dup: DupMode) -> Self {
        self.dup = dup;
        self
    }

    /// Sets the pick weight.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// The effective default quantity.
    #[must_use]
    pub fn default_qty(&self) -> u64 {
        self.default.unwrap_or(self.max)
    }
}

/// Arrangement discipline of one fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// Children appear in definition order.
    Ordered,
    /// Children are interleaved in random order (definition order in
    /// deterministic mode).
    Random,
    /// Exactly one entry is selected, by weight.
    Pick,
}

/// One fragment of a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Arrangement discipline.
    pub kind: FragmentKind,
    /// Child descriptors.
    pub entries: Vec<ChildSpec>,
}

impl Fragment {
    /// An ordered fragment over `entries`.
    #[must_use]
    pub fn ordered(entries: Vec<ChildSpec>) -> Self {
        Self {
            kind: FragmentKind::Ordered,
            entries,
        }
    }

    /// A randomly interleaved fragment over `entries`.
    #[must_use]
    pub fn random(entries: Vec<ChildSpec>) -> Self {
        Self {
            kind: FragmentKind::Random,
            entries,
        }
    }

    /// A pick-one fragment over `entries`.
    #[must_use]
    pub fn pick(entries: Vec<ChildSpec>) -> Self {
        Self {
            kind: FragmentKind::Pick,
            entries,
        }
    }
}

/// One weighted alternative arrangement of a container's children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    /// Selection weight; heavier shapes are tried first.
    pub weight: u32,
    /// Fragments in order.
    pub fragments: Vec<Fragment>,
}

/// Separator interposition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeparatorSpec {
    /// The separator node descriptor.
    pub node: NodeId,
    /// Emit a separator before each child instance (otherwise between
    /// consecutive instances).
    pub prefix: bool,
    /// Emit a trailing separator after the last instance.
    pub suffix: bool,
    /// Materialize a fresh clone per emission (otherwise reuse one node).
    pub unique: bool,
    /// Emit/expect the separator even for a suppressed (zero-quantity)
    /// child.
    pub always: bool,
}

/// A per-child quantity sequence.
///
/// Built once per walk from `{max, default, min}`: deduplicated with the
/// default always present, stored in `[max, default, min]` order, consumed
/// back-to-front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QtySeq {
    /// `[max, default, min]` after dedup.
    vals: Vec<u64>,
    /// Steps already consumed from the back; `0` points at the last value.
    consumed: usize,
}

impl QtySeq {
    pub(crate) fn build(spec: &ChildSpec) -> Self {
        let mut vals = vec![spec.max];
        let default = spec.default_qty();
        if !vals.contains(&default) {
            vals.push(default);
        }
        if !vals.contains(&spec.min) {
            vals.push(spec.min);
        }
        Self { vals, consumed: 0 }
    }

    /// Quantity at the current cursor position.
    pub(crate) fn current(&self) -> u64 {
        let idx = self.vals.len() - 1 - self.consumed;
        self.vals[idx]
    }

    /// `true` when the front of the sequence has been reached.
    pub(crate) fn at_last(&self) -> bool {
        self.consumed + 1 >= self.vals.len()
    }

    /// Consumes one more step. Returns `false` when already at the front.
    pub(crate) fn advance(&mut self) -> bool {
        if self.at_last() {
            return false;
        }
        self.consumed += 1;
        true
    }

    pub(crate) fn reset(&mut self) {
        self.consumed = 0;
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.vals.len()
    }
}

/// The odometer enumerating quantity combinations across a shape's
/// flattened children.
///
/// Two policies share the same cursor pair:
/// - plain (non-combinatorial): the *minor* cursor designates the child
///   currently advancing; once that child's sequence is consumed the minor
///   cursor moves right, children to its left holding their final value.
///   Emits `1 + Σ(len_i − 1)` combinations.
/// - full-combinatorial: a mixed-radix counter over all sequences; the
///   *major* cursor records how far left a carry has reached and bounds
///   the resets. Emits `Π len_i` combinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WalkState {
    seqs: Vec<QtySeq>,
    minor: usize,
    major: usize,
    full_comb: bool,
    /// First combination not yet emitted.
    fresh: bool,
    /// Re-emit the current combination once (constraint re-evaluation).
    replay: bool,
}

impl WalkState {
    pub(crate) fn new(specs: &[ChildSpec], full_comb: bool) -> Self {
        Self {
            seqs: specs.iter().map(QtySeq::build).collect(),
            minor: 0,
            major: 0,
            full_comb,
            fresh: true,
            replay: false,
        }
    }

    /// Current quantity per flattened child.
    pub(crate) fn current(&self) -> Vec<u64> {
        self.seqs.iter().map(QtySeq::current).collect()
    }

    /// `true` when every sequence sits at its final value.
    pub(crate) fn at_end(&self) -> bool {
        self.seqs.iter().all(QtySeq::at_last)
    }

    /// Requests that the next emission repeats the current combination.
    pub(crate) fn step_back(&mut self) {
        if !self.fresh {
            self.replay = true;
        }
    }

    /// Produces the next combination to realize, advancing the odometer by
    /// exactly one step unless this is the first emission or a replay.
    /// Returns `None` when the walk is exhausted.
    pub(crate) fn next_combination(&mut self) -> Option<Vec<u64>> {
        if self.fresh {
            self.fresh = false;
            return Some(self.current());
        }
        if self.replay {
            self.replay = false;
            return Some(self.current());
        }
        if self.advance() {
            Some(self.current())
        } else {
            None
        }
    }

    fn advance(&mut self) -> bool {
        if self.full_comb {
            self.advance_full()
        } else {
            self.advance_plain()
        }
    }

    fn advance_plain(&mut self) -> bool {
        while self.minor < self.seqs.len() {
            if self.seqs[self.minor].advance() {
                return true;
            }
            self.minor += 1;
        }
        false
    }

    fn advance_full(&mut self) -> bool {
        for i in 0..self.seqs.len() {
            if self.seqs[i].advance() {
                self.minor = i;
                self.major = self.major.max(i);
                // Carry: everything right of the reset bound starts over.
                for seq in &mut self.seqs[..i] {
                    seq.reset();
                }
                return true;
            }
        }
        false
    }

    /// Total number of combinations this walk will emit.
    #[cfg(test)]
    fn total(&self) -> usize {
        if self.full_comb {
            self.seqs.iter().map(QtySeq::len).product()
        } else {
            1 + self
                .seqs
                .iter()
                .map(|s| s.len() - 1)
                .sum::<usize>()
        }
    }
}

/// Cursor state over the pick fragments of the current shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PickState {
    /// Per pick fragment: entry indices ordered heaviest-first.
    orders: Vec<Vec<usize>>,
    /// Per pick fragment: position within its order.
    cursors: Vec<usize>,
}

impl PickState {
    pub(crate) fn new(shape: &Shape) -> Self {
        let orders: Vec<Vec<usize>> = shape
            .fragments
            .iter()
            .filter(|f| f.kind == FragmentKind::Pick)
            .map(|f| {
                let mut order: Vec<usize> = (0..f.entries.len()).collect();
                // Stable: ties resolve in definition order.
                order.sort_by_key(|&i| core::cmp::Reverse(f.entries[i].weight));
                order
            })
            .collect();
        let cursors = vec![0; orders.len()];
        Self { orders, cursors }
    }

    /// The selected entry index for the `k`-th pick fragment.
    pub(crate) fn selected(&self, k: usize) -> usize {
        self.orders[k][self.cursors[k]]
    }

    /// `true` when every pick cursor sits on its last entry.
    pub(crate) fn at_end(&self) -> bool {
        self.cursors
            .iter()
            .zip(&self.orders)
            .all(|(c, o)| c + 1 >= o.len())
    }

    /// Advances one pick position (odometer across pick fragments).
    /// Returns `false` when exhausted.
    pub(crate) fn advance(&mut self) -> bool {
        for k in 0..self.cursors.len() {
            if self.cursors[k] + 1 < self.orders[k].len() {
                self.cursors[k] += 1;
                for c in &mut self.cursors[..k] {
                    *c = 0;
                }
                return true;
            }
        }
        false
    }
}

/// Walk discipline derived from the container's attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WalkMode {
    /// Heaviest shape first, sequences consumed in order, exhaustive.
    Determinist,
    /// Weighted-random without replacement; exhausts once every shape has
    /// been drawn.
    FiniteRandom,
    /// Weighted-random with replacement; never exhausts.
    FreeRandom,
}

/// Deterministic sub-state for the currently selected shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CurrentShape {
    pub(crate) shape: usize,
    pub(crate) picks: PickState,
    pub(crate) walk: WalkState,
}

/// The frozen (realized) form of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FrozenForm {
    /// Realized child instances, in emission order.
    pub(crate) children: Vec<NodeId>,
    /// Slots whose existence is still pending a deferred job; they
    /// contribute no bytes until materialized.
    pub(crate) pending: Vec<usize>,
}

/// A child slated for expansion, with its pre-sync quantity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PlannedChild {
    pub(crate) spec: ChildSpec,
    pub(crate) qty: u64,
    pub(crate) frag_kind: FragmentKind,
}

/// Structural container contents.
#[derive(Debug, Clone)]
pub struct NonTerm {
    pub(crate) shapes: Vec<Shape>,
    pub(crate) separator: Option<SeparatorSpec>,
    pub(crate) codec: Option<Box<dyn Codec>>,
    /// Full cross-product enumeration instead of the plain policy.
    pub(crate) full_comb: bool,
    /// Shapes already consumed (deterministic) or drawn (finite-random).
    pub(crate) excluded_shapes: BTreeSet<usize>,
    /// Deterministic sub-state for the selected shape.
    pub(crate) current: Option<CurrentShape>,
    /// Realized children of the last freeze/absorb.
    pub(crate) frozen: Option<FrozenForm>,
    /// Frozen form saved during a tentative absorption.
    pub(crate) saved_frozen: Option<Option<FrozenForm>>,
    /// Latched once all exhaustion levels held simultaneously.
    pub(crate) exhausted: bool,
}

impl NonTerm {
    /// A container over the given weighted shapes.
    #[must_use]
    pub fn new(shapes: Vec<Shape>) -> Self {
        Self {
            shapes,
            separator: None,
            codec: None,
            full_comb: false,
            excluded_shapes: BTreeSet::new(),
            current: None,
            frozen: None,
            saved_frozen: None,
            exhausted: false,
        }
    }

    /// `true` once the deterministic/finite walk has covered every variant.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Clears cursors, exclusions, frozen state, and the exhaustion latch.
    pub(crate) fn reset_state(&mut self) {
        self.excluded_shapes.clear();
        self.current = None;
        self.frozen = None;
        self.saved_frozen = None;
        self.exhausted = false;
    }

    /// Child descriptors of every shape (definition order, deduplicated).
    pub(crate) fn all_child_nodes(&self) -> Vec<NodeId> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for shape in &self.shapes {
            for frag in &shape.fragments {
                for entry in &frag.entries {
                    if seen.insert(entry.node) {
                        out.push(entry.node);
                    }
                }
            }
        }
        out
    }

    /// Selects the arrangement to realize this freeze and the per-child
    /// quantities, advancing exactly one enumeration step in deterministic
    /// mode. Returns `None` when the container has no shapes.
    pub(crate) fn plan(&mut self, mode: WalkMode, rng: &mut StdRng) -> Option<Vec<PlannedChild>> {
        if self.shapes.is_empty() {
            return None;
        }
        match mode {
            WalkMode::Determinist => self.plan_determinist(),
            WalkMode::FiniteRandom => self.plan_random(rng, true),
            WalkMode::FreeRandom => self.plan_random(rng, false),
        }
    }

    fn plan_determinist(&mut self) -> Option<Vec<PlannedChild>> {
        loop {
            if self.current.is_none() {
                let shape = self.heaviest_unexcluded()?;
                let picks = PickState::new(&self.shapes[shape]);
                let walk = self.walk_for(shape, &picks);
                self.current = Some(CurrentShape { shape, picks, walk });
            }
            let (combination, shape_idx) = match self.current.as_mut() {
                Some(cur) => (cur.walk.next_combination(), cur.shape),
                None => return None,
            };
            if let Some(qtys) = combination {
                let plan = match self.current.as_ref() {
                    Some(cur) => planned(&self.shapes[shape_idx], Some(&cur.picks), &qtys),
                    None => return None,
                };
                self.note_exhaustion_determinist();
                return Some(plan);
            }
            // Quantity walk exhausted: advance the pick odometer, else
            // retire this shape and move to the next heaviest.
            let picks_advanced = self
                .current
                .as_mut()
                .is_some_and(|cur| cur.picks.advance());
            if picks_advanced {
                let walk = match self.current.as_ref() {
                    Some(cur) => self.walk_for(shape_idx, &cur.picks),
                    None => return None,
                };
                if let Some(cur) = self.current.as_mut() {
                    cur.walk = walk;
                }
            } else {
                self.excluded_shapes.insert(shape_idx);
                self.current = None;
                if self.heaviest_unexcluded().is_none() {
                    // Every level exhausted at once: latch and wrap around.
                    self.exhausted = true;
                    self.excluded_shapes.clear();
                }
            }
        }
    }

    fn walk_for(&self, shape: usize, picks: &PickState) -> WalkState {
        let specs: Vec<ChildSpec> = flatten(&self.shapes[shape], Some(picks))
            .iter()
            .map(|p| p.spec)
            .collect();
        WalkState::new(&specs, self.full_comb)
    }

    /// Latches exhaustion when the just-emitted combination was the final
    /// one on every level.
    fn note_exhaustion_determinist(&mut self) {
        let Some(cur) = self.current.as_ref() else {
            return;
        };
        let last_walk = cur.walk.at_end();
        let last_pick = cur.picks.at_end();
        let remaining = self
            .shapes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != cur.shape && !self.excluded_shapes.contains(i))
            .count();
        if last_walk && last_pick && remaining == 0 {
            self.exhausted = true;
        }
    }

    fn plan_random(&mut self, rng: &mut StdRng, finite: bool) -> Option<Vec<PlannedChild>> {
        let shape = if finite {
            if self.excluded_shapes.len() >= self.shapes.len() {
                // Shape-exhausted: latch and wrap.
                self.exhausted = true;
                self.excluded_shapes.clear();
            }
            let candidates: Vec<usize> = (0..self.shapes.len())
                .filter(|i| !self.excluded_shapes.contains(i))
                .collect();
            let picked = weighted_draw(rng, &candidates, |i| self.shapes[*i].weight)?;
            self.excluded_shapes.insert(picked);
            if self.excluded_shapes.len() >= self.shapes.len() {
                self.exhausted = true;
            }
            picked
        } else {
            let all: Vec<usize> = (0..self.shapes.len()).collect();
            weighted_draw(rng, &all, |i| self.shapes[*i].weight)?
        };

        let mut plan = Vec::new();
        for frag in &self.shapes[shape].fragments {
            match frag.kind {
                FragmentKind::Pick => {
                    let idxs: Vec<usize> = (0..frag.entries.len()).collect();
                    if let Some(i) = weighted_draw(rng, &idxs, |i| frag.entries[*i].weight) {
                        let spec = frag.entries[i];
                        plan.push(PlannedChild {
                            spec,
                            qty: draw_qty(rng, &spec),
                            frag_kind: frag.kind,
                        });
                    }
                }
                FragmentKind::Ordered | FragmentKind::Random => {
                    for spec in &frag.entries {
                        plan.push(PlannedChild {
                            spec: *spec,
                            qty: draw_qty(rng, spec),
                            frag_kind: frag.kind,
                        });
                    }
                }
            }
        }
        Some(plan)
    }

    fn heaviest_unexcluded(&self) -> Option<usize> {
        self.shapes
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.excluded_shapes.contains(i))
            .max_by_key(|(i, s)| (s.weight, core::cmp::Reverse(*i)))
            .map(|(i, _)| i)
    }

    /// Shape indices ordered heaviest-first (absorption trial order).
    pub(crate) fn shapes_by_weight(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.shapes.len()).collect();
        order.sort_by_key(|&i| core::cmp::Reverse(self.shapes[i].weight));
        order
    }
}

/// Flattens a shape into its effective children given pick selections
/// (`None` keeps every pick entry — used for name collision checks).
pub(crate) fn flatten(shape: &Shape, picks: Option<&PickState>) -> Vec<PlannedChild> {
    let mut out = Vec::new();
    let mut pick_idx = 0;
    for frag in &shape.fragments {
        match frag.kind {
            FragmentKind::Pick => {
                if let Some(picks) = picks {
                    let sel = picks.selected(pick_idx);
                    out.push(PlannedChild {
                        spec: frag.entries[sel],
                        qty: 0,
                        frag_kind: frag.kind,
                    });
                } else {
                    for spec in &frag.entries {
                        out.push(PlannedChild {
                            spec: *spec,
                            qty: 0,
                            frag_kind: frag.kind,
                        });
                    }
                }
                pick_idx += 1;
            }
            FragmentKind::Ordered | FragmentKind::Random => {
                for spec in &frag.entries {
                    out.push(PlannedChild {
                        spec: *spec,
                        qty: 0,
                        frag_kind: frag.kind,
                    });
                }
            }
        }
    }
    out
}

fn planned(shape: &Shape, picks: Option<&PickState>, qtys: &[u64]) -> Vec<PlannedChild> {
    let mut plan = flatten(shape, picks);
    for (child, qty) in plan.iter_mut().zip(qtys) {
        child.qty = *qty;
    }
    plan
}

fn draw_qty(rng: &mut StdRng, spec: &ChildSpec) -> u64 {
    if spec.min >= spec.max {
        spec.min
    } else {
        rng.gen_range(spec.min..=spec.max)
    }
}

/// Weighted draw over `items`; `None` on an empty slice or zero total.
pub(crate) fn weighted_draw<T: Copy>(
    rng: &mut StdRng,
    items: &[T],
    weight: impl Fn(&T) -> u32,
) -> Option<T> {
    let total: u64 = items.iter().map(|i| u64::from(weight(i))).sum();
    if total == 0 {
        return items.first().copied();
    }
    let mut draw = rng.gen_range(0..total);
    for item in items {
        let w = u64::from(weight(item));
        if draw < w {
            return Some(*item);
        }
        draw -= w;
    }
    items.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn nid(i: usize) -> NodeId {
        NodeId::from_index(i)
    }

    #[test]
    fn qty_seq_consumes_min_first_then_default_then_max() {
        let spec = ChildSpec::ranged(nid(0), 1, 5).with_default(3);
        let mut seq = QtySeq::build(&spec);
        assert_eq!(seq.current(), 1);
        assert!(seq.advance());
        assert_eq!(seq.current(), 3);
        assert!(seq.advance());
        assert_eq!(seq.current(), 5);
        assert!(!seq.advance());
    }

    #[test]
    fn qty_seq_dedups_but_keeps_default() {
        let spec = ChildSpec::ranged(nid(0), 2, 2).with_default(2);
        let seq = QtySeq::build(&spec);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq.current(), 2);
    }

    #[test]
    fn plain_walk_emits_one_plus_sum() {
        let specs = vec![
            ChildSpec::ranged(nid(0), 0, 2).with_default(1), // len 3
            ChildSpec::ranged(nid(1), 1, 2),                 // len 2
        ];
        let mut walk = WalkState::new(&specs, false);
        assert_eq!(walk.total(), 4);
        let mut emitted = Vec::new();
        while let Some(c) = walk.next_combination() {
            emitted.push(c);
        }
        assert_eq!(emitted.len(), 4);
        // Left child steps through its sequence first, then the right one.
        assert_eq!(emitted[0], vec![0, 1]);
        assert_eq!(emitted[1], vec![1, 1]);
        assert_eq!(emitted[2], vec![2, 1]);
        assert_eq!(emitted[3], vec![2, 2]);
    }

    #[test]
    fn full_walk_emits_cross_product() {
        let specs = vec![
            ChildSpec::ranged(nid(0), 0, 1), // len 2
            ChildSpec::ranged(nid(1), 1, 3).with_default(2), // len 3
        ];
        let mut walk = WalkState::new(&specs, true);
        assert_eq!(walk.total(), 6);
        let mut emitted = Vec::new();
        while let Some(c) = walk.next_combination() {
            emitted.push(c);
        }
        assert_eq!(emitted.len(), 6);
        // No duplicates: the counter covers the whole cross product.
        let unique: BTreeSet<Vec<u64>> = emitted.iter().cloned().collect();
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn step_back_replays_current_combination() {
        let specs = vec![ChildSpec::ranged(nid(0), 0, 2)];
        let mut walk = WalkState::new(&specs, false);
        let first = walk.next_combination();
        let second = walk.next_combination();
        walk.step_back();
        let replay = walk.next_combination();
        assert_eq!(second, replay);
        assert_ne!(first, second);
    }

    #[test]
    fn pick_state_walks_heaviest_first() {
        let shape = Shape {
            weight: 1,
            fragments: vec![Fragment::pick(vec![
                ChildSpec::one(nid(0)).with_weight(5),
                ChildSpec::one(nid(1)).with_weight(10),
            ])],
        };
        let mut picks = PickState::new(&shape);
        assert_eq!(picks.selected(0), 1); // heaviest entry first
        assert!(!picks.at_end());
        assert!(picks.advance());
        assert_eq!(picks.selected(0), 0);
        assert!(picks.at_end());
        assert!(!picks.advance());
    }

    #[test]
    fn determinist_plan_exhausts_reproducibly() {
        let shapes = vec![Shape {
            weight: 1,
            fragments: vec![Fragment::ordered(vec![
                ChildSpec::ranged(nid(0), 0, 1), // len 2
                ChildSpec::ranged(nid(1), 1, 2), // len 2
            ])],
        }];
        let mut rng = StdRng::seed_from_u64(0);
        let count = |nt: &mut NonTerm, rng: &mut StdRng| {
            let mut n = 0;
            while !nt.is_exhausted() {
                let _ = nt.plan(WalkMode::Determinist, rng);
                n += 1;
                assert!(n < 100, "walk failed to terminate");
            }
            n
        };
        let mut nt = NonTerm::new(shapes.clone());
        let first = count(&mut nt, &mut rng);
        let mut nt2 = NonTerm::new(shapes);
        let second = count(&mut nt2, &mut rng);
        assert_eq!(first, 3); // plain policy: 1 + (2-1) + (2-1)
        assert_eq!(first, second);
    }

    #[test]
    fn finite_random_draws_each_shape_once() {
        let shapes = vec![
            Shape {
                weight: 3,
                fragments: vec![Fragment::ordered(vec![ChildSpec::one(nid(0))])],
            },
            Shape {
                weight: 1,
                fragments: vec![Fragment::ordered(vec![ChildSpec::one(nid(1))])],
            },
        ];
        let mut nt = NonTerm::new(shapes);
        let mut rng = StdRng::seed_from_u64(7);
        let a = nt.plan(WalkMode::FiniteRandom, &mut rng);
        assert!(a.is_some());
        assert!(!nt.is_exhausted());
        let b = nt.plan(WalkMode::FiniteRandom, &mut rng);
        assert!(b.is_some());
        assert!(nt.is_exhausted());
        // The two draws covered distinct shapes.
        let first = a.and_then(|p| p.first().map(|c| c.spec.node));
        let second = b.and_then(|p| p.first().map(|c| c.spec.node));
        assert_ne!(first, second);
    }

    #[test]
    fn free_random_never_exhausts() {
        let shapes = vec![Shape {
            weight: 1,
            fragments: vec![Fragment::ordered(vec![ChildSpec::one(nid(0))])],
        }];
        let mut nt = NonTerm::new(shapes);
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            assert!(nt.plan(WalkMode::FreeRandom, &mut rng).is_some());
        }
        assert!(!nt.is_exhausted());
    }
}
