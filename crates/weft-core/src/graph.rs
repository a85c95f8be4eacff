// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The grammar graph arena and its public API.
//!
//! All nodes of one grammar live in a single append-only arena; every
//! cross-reference (child lists, argument bindings, sync targets,
//! entanglement members) is a [`NodeId`] resolved through the arena.
//! Cloning a subgraph copies the reachable identities into fresh slots and
//! remaps them through a copy dictionary; references escaping the copied
//! region are rejected, passed through, or filtered by a caller-supplied
//! acceptance set.
//!
//! Definition errors (duplicate sibling names, malformed ranges, separator
//! collisions, unresolvable sync targets) are fatal at construction time.
//! Freezing never fails: plugin panics are caught at the boundary and
//! degrade to default values with a diagnostic.

use std::panic::{catch_unwind, AssertUnwindSafe};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::warn;

use crate::attrs::Attr;
use crate::codec::Codec;
use crate::contents::{Contents, ContentsKind, FnInput, GenInput, GeneratorFn, NodeFn};
use crate::csts::AbsCsts;
use crate::entangle::{EntangleTable, RemoveOutcome};
use crate::env::Env;
use crate::ident::{EntangleId, NodeId};
use crate::jobs::{Job, JobPriority};
use crate::node::Node;
use crate::nonterm::{ChildSpec, Fragment, NonTerm, SeparatorSpec, Shape};
use crate::sync::{
    resolve_size, ExistenceCond, QtySync, SizeSync, SyncParam, SyncScope,
};
use crate::vt::ValueType;

/// Upper bound on deferred-job waves drained per top-level freeze; a
/// grammar whose jobs keep re-queueing past this is cyclic by definition.
const MAX_JOB_WAVES: usize = 4;

/// Errors raised while defining or cloning a grammar.
///
/// These are fatal: the graph must not be used until the definition is
/// fixed. Absorption rejection is *not* an error (see
/// [`crate::AbsorbStatus`]).
#[derive(Debug, Error)]
pub enum GrammarError {
    /// Two distinct sibling descriptors under one parent and configuration
    /// share a name.
    #[error("duplicate sibling name: {0}")]
    DuplicateSiblingName(String),
    /// A child's quantity range has `min > max`.
    #[error("malformed quantity range [{min}, {max}] for child {name}")]
    MalformedQuantityRange {
        /// Offending child name.
        name: String,
        /// Declared minimum.
        min: u64,
        /// Declared maximum.
        max: u64,
    },
    /// The separator's name collides with a sibling descriptor.
    #[error("separator name collides with sibling: {0}")]
    SeparatorNameCollision(String),
    /// The requested configuration label does not exist on the node.
    #[error("unknown configuration: {0}")]
    UnknownConfiguration(String),
    /// The operation requires a structural container.
    #[error("node {0} is not a structural container")]
    NotNonTerminal(NodeId),
    /// A non-owned reference (argument binding, sync target, entanglement
    /// peer) escapes the cloned subgraph and the policy rejects it.
    #[error("reference escapes the cloned subgraph: {0}")]
    ExternalReference(NodeId),
    /// A sync relation targets an identity outside the graph.
    #[error("sync target cannot be resolved: {0}")]
    UnresolvableSyncTarget(NodeId),
}

/// Policy for non-owned references that escape a cloned subgraph.
#[derive(Debug, Clone, Default)]
pub enum EntanglePolicy {
    /// Fail the clone (the safe default).
    #[default]
    RejectExternal,
    /// Keep external references unchanged in the copies.
    AcceptExternal,
    /// Keep external references only when present in this set.
    AcceptSet(FxHashSet<NodeId>),
}

/// Options for [`Graph::clone_node`].
#[derive(Debug, Clone, Default)]
pub struct CloneOpts {
    /// Rename the cloned root.
    pub new_name: Option<String>,
    /// Discard computed state (frozen values, cursors, memos) in the
    /// copies instead of preserving it.
    pub ignore_frozen: bool,
    /// Policy for references escaping the subgraph.
    pub entangle: EntanglePolicy,
}

/// Fine-grained unfreeze control.
#[derive(Debug, Clone, Copy)]
pub struct UnfreezeOpts {
    /// Walk the whole subtree (otherwise only this node).
    pub recursive: bool,
    /// Preserve structural and enumeration state: containers keep their
    /// realized child list and leaves re-emit their current value; only
    /// the computed bytes are discarded.
    pub dont_change_state: bool,
    /// Only reset generator memos; everything else is untouched.
    pub only_generators: bool,
    /// Re-evaluate existence/sync constraints: containers roll the
    /// combinatorial cursor back one step so the next freeze re-realizes
    /// the same variant under fresh constraint resolution.
    pub reevaluate_constraints: bool,
}

impl Default for UnfreezeOpts {
    fn default() -> Self {
        Self {
            recursive: true,
            dont_change_state: false,
            only_generators: false,
            reevaluate_constraints: false,
        }
    }
}

/// The grammar graph: node arena, entanglement table, environment, RNG.
///
/// One graph plus its environment is a single-threaded unit: every freeze,
/// unfreeze, or absorb call assumes exclusive access.
#[derive(Debug)]
pub struct Graph {
    pub(crate) nodes: Vec<Node>,
    pub(crate) entangle: EntangleTable,
    pub(crate) env: Env,
    pub(crate) rng: StdRng,
    /// Non-zero while a container expansion is on the stack (trigger-last
    /// generators defer themselves only in that context).
    pub(crate) expansion_depth: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty graph with a fixed default seed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// An empty graph whose random modes draw from `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            entangle: EntangleTable::default(),
            env: Env::default(),
            rng: StdRng::seed_from_u64(seed),
            expansion_depth: 0,
        }
    }

    /// Adds a fresh node with empty contents under its `MAIN`
    /// configuration.
    pub fn add(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Node::new(name));
        id
    }

    /// Number of nodes in the arena (live and orphaned alike).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// `true` when the arena holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Read access to a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// The graph's environment (drawn attributes, corruption hooks).
    #[must_use]
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// Mutable access to the environment, e.g. to install corruption
    /// hooks.
    pub fn env_mut(&mut self) -> &mut Env {
        &mut self.env
    }

    // ── Grammar construction ────────────────────────────────────────────

    /// Makes `id` a leaf around the given value type (active
    /// configuration).
    pub fn set_values(&mut self, id: NodeId, vt: Box<dyn ValueType>) {
        self.replace_contents(id, Contents::typed(vt));
    }

    /// Makes `id` a computed node (active configuration).
    pub fn set_function(
        &mut self,
        id: NodeId,
        func: NodeFn,
        args: Vec<NodeId>,
        arg_value: Option<Vec<u8>>,
    ) {
        self.replace_contents(id, Contents::func(func, args, arg_value, true));
    }

    /// Makes `id` a generator node (active configuration).
    pub fn set_generator(
        &mut self,
        id: NodeId,
        make: GeneratorFn,
        args: Vec<NodeId>,
        arg_value: Option<Vec<u8>>,
    ) {
        self.replace_contents(id, Contents::generator(make, args, arg_value, true));
    }

    /// Switches a function/generator between frozen-args mode (arguments
    /// serialized before the call) and live-args mode (argument node ids
    /// passed through).
    pub fn set_frozen_args_mode(&mut self, id: NodeId, frozen: bool) {
        match &mut self.node_mut(id).contents_mut().kind {
            ContentsKind::Func(f) => f.frozen_args = frozen,
            ContentsKind::Gen(g) => g.frozen_args = frozen,
            _ => {}
        }
    }

    /// Makes `id` a container with a single ordered arrangement of
    /// `children`.
    ///
    /// # Errors
    /// Definition errors: malformed ranges, duplicate sibling names.
    pub fn set_subnodes_ordered(
        &mut self,
        id: NodeId,
        children: Vec<ChildSpec>,
    ) -> Result<(), GrammarError> {
        self.set_subnodes_weighted(
            id,
            vec![Shape {
                weight: 1,
                fragments: vec![Fragment::ordered(children)],
            }],
        )
    }

    /// Makes `id` a container over the given weighted shapes.
    ///
    /// # Errors
    /// Definition errors: malformed ranges, duplicate sibling names,
    /// separator collisions (when a separator was installed first).
    pub fn set_subnodes_weighted(
        &mut self,
        id: NodeId,
        shapes: Vec<Shape>,
    ) -> Result<(), GrammarError> {
        self.check_shapes(&shapes)?;
        let prior_sep = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt.separator,
            _ => None,
        };
        if let Some(sep) = prior_sep {
            let sep_name = self.node(sep.node).name().to_owned();
            self.check_separator(&shapes, sep.node, &sep_name)?;
        }
        let mut nt = NonTerm::new(shapes);
        nt.separator = prior_sep;
        self.replace_contents(id, Contents::nonterm(nt));
        Ok(())
    }

    /// Installs a separator on a container.
    ///
    /// # Errors
    /// [`GrammarError::NotNonTerminal`] when `id` is not a container,
    /// [`GrammarError::SeparatorNameCollision`] when the separator shares a
    /// sibling's name.
    pub fn set_separator(&mut self, id: NodeId, sep: SeparatorSpec) -> Result<(), GrammarError> {
        let sep_name = self.node(sep.node).name().to_owned();
        let shapes = match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt.shapes.clone(),
            _ => return Err(GrammarError::NotNonTerminal(id)),
        };
        self.check_separator(&shapes, sep.node, &sep_name)?;
        self.set_attr(sep.node, Attr::Separator);
        if let ContentsKind::NonTerm(nt) = &mut self.node_mut(id).contents_mut().kind {
            nt.separator = Some(sep);
        }
        Ok(())
    }

    /// Attaches a codec to a container.
    ///
    /// # Errors
    /// [`GrammarError::NotNonTerminal`] when `id` is not a container.
    pub fn set_codec(&mut self, id: NodeId, codec: Box<dyn Codec>) -> Result<(), GrammarError> {
        match &mut self.node_mut(id).contents_mut().kind {
            ContentsKind::NonTerm(nt) => {
                nt.codec = Some(codec);
                Ok(())
            }
            _ => Err(GrammarError::NotNonTerminal(id)),
        }
    }

    /// Selects between the plain exhaustion policy and the full
    /// cross-product policy for a container's quantity walk.
    ///
    /// # Errors
    /// [`GrammarError::NotNonTerminal`] when `id` is not a container.
    pub fn set_full_combinatory(&mut self, id: NodeId, full: bool) -> Result<(), GrammarError> {
        match &mut self.node_mut(id).contents_mut().kind {
            ContentsKind::NonTerm(nt) => {
                nt.full_comb = full;
                Ok(())
            }
            _ => Err(GrammarError::NotNonTerminal(id)),
        }
    }

    /// Adds an alternate configuration with empty contents (no-op when the
    /// label already exists).
    pub fn add_conf(&mut self, id: NodeId, label: impl Into<String>) {
        self.node_mut(id)
            .confs
            .entry(label.into())
            .or_insert_with(Contents::empty);
    }

    /// Switches the node's active configuration.
    ///
    /// # Errors
    /// [`GrammarError::UnknownConfiguration`] when the label was never
    /// added.
    pub fn set_conf(&mut self, id: NodeId, label: &str) -> Result<(), GrammarError> {
        let node = self.node_mut(id);
        if !node.confs.contains_key(label) {
            return Err(GrammarError::UnknownConfiguration(label.to_owned()));
        }
        node.active = label.to_owned();
        Ok(())
    }

    /// Attaches a sync relation to `id`'s active contents.
    ///
    /// # Errors
    /// [`GrammarError::UnresolvableSyncTarget`] when `target` (or a
    /// condition's target) is outside the arena.
    pub fn make_synchronized_with(
        &mut self,
        id: NodeId,
        scope: SyncScope,
        target: NodeId,
        param: SyncParam,
    ) -> Result<(), GrammarError> {
        if target.index() >= self.nodes.len() {
            return Err(GrammarError::UnresolvableSyncTarget(target));
        }
        let base = match &param {
            SyncParam::Base(b) | SyncParam::EncodedBase(b) => *b,
            SyncParam::None | SyncParam::Cond(_) => 0,
        };
        let node_count = self.nodes.len();
        let syncs = &mut self.node_mut(id).contents_mut().meta.syncs;
        match scope {
            SyncScope::Qty => syncs.qty = Some(QtySync { target, base }),
            SyncScope::QtyFrom => syncs.qty_from = Some(QtySync { target, base }),
            SyncScope::Size => {
                syncs.size = Some(SizeSync {
                    target,
                    base,
                    encoded: matches!(param, SyncParam::EncodedBase(_)),
                });
            }
            SyncScope::Existence | SyncScope::Inexistence => {
                let cond = match param {
                    SyncParam::Cond(c) => c,
                    _ => ExistenceCond::Present(target),
                };
                if let Some(t) = cond_targets(&cond)
                    .into_iter()
                    .find(|t| t.index() >= node_count)
                {
                    return Err(GrammarError::UnresolvableSyncTarget(t));
                }
                if scope == SyncScope::Existence {
                    syncs.existence = Some(cond);
                } else {
                    syncs.inexistence = Some(cond);
                }
            }
        }
        Ok(())
    }

    /// Pins an absorption constraint set on this node, overriding the
    /// inherited one.
    pub fn enforce_absorption_constraints(&mut self, id: NodeId, csts: AbsCsts) {
        self.node_mut(id).contents_mut().meta.abs_csts = Some(csts);
    }

    // ── Attributes, entanglement, metadata ──────────────────────────────

    /// Sets an attribute on `id` and every entangled peer.
    pub fn set_attr(&mut self, id: NodeId, attr: Attr) {
        for peer in self.entangled_group(id) {
            let c = self.node_mut(peer).contents_mut();
            c.meta.attrs.set(attr);
            if attr == Attr::Determinist {
                if let ContentsKind::Typed(t) = &mut c.kind {
                    t.vt.make_determinist();
                }
            }
        }
    }

    /// Clears an attribute on `id` and every entangled peer.
    pub fn clear_attr(&mut self, id: NodeId, attr: Attr) {
        for peer in self.entangled_group(id) {
            let c = self.node_mut(peer).contents_mut();
            c.meta.attrs.clear(attr);
            if attr == Attr::Determinist {
                if let ContentsKind::Typed(t) = &mut c.kind {
                    t.vt.make_random();
                }
            }
        }
    }

    /// `true` when `id`'s active contents carries `attr`.
    #[must_use]
    pub fn has_attr(&self, id: NodeId, attr: Attr) -> bool {
        self.node(id).contents().has_attr(attr)
    }

    /// Replaces `id`'s active-configuration contents, fanning the change
    /// out to every entangled peer.
    pub fn set_contents(&mut self, id: NodeId, contents: Contents) {
        for peer in self.entangled_group(id) {
            *self.node_mut(peer).contents_mut() = contents.clone();
        }
    }

    fn replace_contents(&mut self, id: NodeId, contents: Contents) {
        self.set_contents(id, contents);
    }

    /// Entangles two nodes: attribute and contents mutations on one become
    /// visible on the other (and any prior peers of either).
    pub fn entangle(&mut self, a: NodeId, b: NodeId) {
        if a == b {
            return;
        }
        let ha = self.node(a).entangled;
        let hb = self.node(b).entangled;
        match (ha, hb) {
            (None, None) => {
                let set = self.entangle.create([a, b].into_iter().collect());
                self.node_mut(a).entangled = Some(set);
                self.node_mut(b).entangled = Some(set);
            }
            (Some(set), None) => {
                self.entangle.add(set, b);
                self.node_mut(b).entangled = Some(set);
            }
            (None, Some(set)) => {
                self.entangle.add(set, a);
                self.node_mut(a).entangled = Some(set);
            }
            (Some(sa), Some(sb)) => {
                for moved in self.entangle.merge(sa, sb) {
                    self.node_mut(moved).entangled = Some(sa);
                }
            }
        }
    }

    /// Removes `id` from its entanglement set (collapsing a pair to
    /// nothing, per the ≤1-member invariant).
    pub fn disentangle(&mut self, id: NodeId) {
        let Some(set) = self.node(id).entangled else {
            return;
        };
        match self.entangle.remove(set, id) {
            RemoveOutcome::Collapsed(last) => {
                self.node_mut(last).entangled = None;
            }
            RemoveOutcome::Removed | RemoveOutcome::NotAMember => {}
        }
        self.node_mut(id).entangled = None;
    }

    /// Current entangled peers of `id`, excluding `id` itself.
    #[must_use]
    pub fn entangled_peers(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).entangled.map_or_else(Vec::new, |set| {
            self.entangle
                .members(set)
                .into_iter()
                .filter(|&n| n != id)
                .collect()
        })
    }

    fn entangled_group(&self, id: NodeId) -> Vec<NodeId> {
        let mut group = vec![id];
        group.extend(self.entangled_peers(id));
        group
    }

    /// Sets the fuzz-priority weight.
    pub fn set_fuzz_weight(&mut self, id: NodeId, weight: u8) {
        self.node_mut(id).fuzz_weight = weight;
    }

    /// Attaches semantics tags.
    pub fn set_semantics<I, S>(&mut self, id: NodeId, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_mut(id).semantics = Some(tags.into_iter().map(Into::into).collect());
    }

    /// Attaches a private payload.
    pub fn set_private(&mut self, id: NodeId, payload: Vec<u8>) {
        self.node_mut(id).private = Some(payload);
    }

    // ── Freeze / unfreeze ───────────────────────────────────────────────

    /// Computes (or returns the memoized) byte value of `id`.
    ///
    /// Deferred jobs registered during the computation are drained before
    /// returning and the value is recomputed, so the result reflects
    /// post-job-resolution state. Exhaustion of the underlying variant is
    /// signalled to the environment.
    pub fn freeze(&mut self, id: NodeId) -> Vec<u8> {
        self.refresh_depths(id);
        let mut out = self.freeze_rec(id);
        let mut waves = 0;
        while !self.env.jobs.is_empty() && waves < MAX_JOB_WAVES {
            let jobs = self.env.jobs.drain_all();
            for job in jobs {
                self.run_job(job);
            }
            out = self.freeze_rec(id);
            waves += 1;
        }
        if waves == MAX_JOB_WAVES && !self.env.jobs.is_empty() {
            warn!(node = %id, "deferred jobs kept re-queueing; grammar has a resolution cycle");
            self.env.jobs.clear();
        }
        out
    }

    /// Realizes `id`'s structure without returning bytes: containers
    /// select a shape and materialize their child instances, which are then
    /// visible through [`Graph::realized_children`]. Non-containers are
    /// untouched.
    pub fn expand(&mut self, id: NodeId) -> Vec<NodeId> {
        let needs_expansion = matches!(
            &self.node(id).contents().kind,
            ContentsKind::NonTerm(nt) if nt.frozen.is_none()
        );
        if needs_expansion {
            self.expand_nonterm(id);
        }
        self.realized_children(id)
    }

    /// The realized child instances of a container's last freeze or
    /// absorb, in emission order. Empty for unexpanded or non-container
    /// nodes.
    #[must_use]
    pub fn realized_children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.node(id).contents().kind {
            ContentsKind::NonTerm(nt) => nt
                .frozen
                .as_ref()
                .map_or_else(Vec::new, |f| f.children.clone()),
            _ => Vec::new(),
        }
    }

    /// Freezes `id` under a specific configuration, restoring the previous
    /// active configuration afterwards.
    ///
    /// # Errors
    /// [`GrammarError::UnknownConfiguration`] when the label was never
    /// added.
    pub fn freeze_conf(&mut self, id: NodeId, conf: &str) -> Result<Vec<u8>, GrammarError> {
        let prior = self.node(id).active.clone();
        self.set_conf(id, conf)?;
        let out = self.freeze(id);
        self.node_mut(id).active = prior;
        Ok(out)
    }

    pub(crate) fn freeze_rec(&mut self, id: NodeId) -> Vec<u8> {
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
            K::Empty => Vec::new(),
            K::Typed => self.freeze_typed(id),
            K::Func => self.freeze_func(id),
            K::Gen => self.freeze_gen(id),
            K::NonTerm => self.freeze_nonterm(id),
        }
    }

    fn freeze_typed(&mut self, id: NodeId) -> Vec<u8> {
        if let Some(frozen) = self.node(id).contents().meta.frozen.clone() {
            return frozen;
        }
        // Size sync resolution happens before the value is produced; a miss
        // parks a patch job so the post-job recompute sees the final size.
        let size_sync = self.node(id).contents().meta.syncs.size;
        let resolved = size_sync.and_then(|s| resolve_size(&self.env, &s));
        let hook = self.env.take_size_hook(id);
        let target_size = hook.or(resolved);
        if size_sync.is_some() && target_size.is_none() {
            self.env
                .jobs
                .push(JobPriority::SIZE_SYNC, Job::SizeSyncPatch { node: id });
        }
        let c = self.node_mut(id).contents_mut();
        let ContentsKind::Typed(t) = &mut c.kind else {
            return Vec::new();
        };
        if let Some(size) = target_size {
            let _ = t.vt.set_u64(u64::try_from(size).unwrap_or(u64::MAX));
        }
        let bytes = t.vt.get_value();
        let exhausted = t.vt.is_exhausted();
        c.meta.frozen = Some(bytes.clone());
        if exhausted {
            self.env.mark_exhausted(id);
        }
        bytes
    }

    fn freeze_func(&mut self, id: NodeId) -> Vec<u8> {
        if let Some(frozen) = self.node(id).contents().meta.frozen.clone() {
            return frozen;
        }
        let bytes = self.compute_func_value(id);
        self.node_mut(id).contents_mut().meta.frozen = Some(bytes.clone());
        bytes
    }

    /// Runs a function node's callback against its current arguments
    /// without touching the memo.
    pub(crate) fn compute_func_value(&mut self, id: NodeId) -> Vec<u8> {
        let (func, args, arg_value, frozen_mode) = match &self.node(id).contents().kind {
            ContentsKind::Func(f) => (f.func, f.args.clone(), f.arg_value.clone(), f.frozen_args),
            _ => return Vec::new(),
        };
        let frozen_args: Option<Vec<Vec<u8>>> = if frozen_mode {
            Some(args.iter().map(|a| self.freeze_rec(*a)).collect())
        } else {
            None
        };
        let input = FnInput {
            graph: self,
            args: &args,
            frozen_args: frozen_args.as_deref(),
            arg_value: arg_value.as_deref(),
        };
        catch_unwind(AssertUnwindSafe(|| (func)(&input))).unwrap_or_else(|_| {
            warn!(node = %id, "function callback panicked; substituting empty value");
            Vec::new()
        })
    }

    fn freeze_gen(&mut self, id: NodeId) -> Vec<u8> {
        let (produced, trigger_last, pending) = {
            let c = self.node(id).contents();
            let trigger = c.has_attr(Attr::TriggerLast);
            match &c.kind {
                ContentsKind::Gen(g) => (g.produced, trigger, g.pending_job),
                _ => return Vec::new(),
            }
        };
        if let Some(root) = produced {
            return self.freeze_rec(root);
        }
        if trigger_last && self.expansion_depth > 0 {
            if !pending {
                self.env
                    .jobs
                    .push(JobPriority::GENERATOR, Job::TriggerLastGen { node: id });
                if let ContentsKind::Gen(g) = &mut self.node_mut(id).contents_mut().kind {
                    g.pending_job = true;
                }
            }
            return Vec::new();
        }
        let root = self.run_generator(id);
        self.freeze_rec(root)
    }

    pub(crate) fn run_generator(&mut self, id: NodeId) -> NodeId {
        let (make, args, arg_value, frozen_mode) = match &self.node(id).contents().kind {
            ContentsKind::Gen(g) => (g.make, g.args.clone(), g.arg_value.clone(), g.frozen_args),
            _ => return id,
        };
        let frozen_args: Option<Vec<Vec<u8>>> = if frozen_mode {
            Some(args.iter().map(|a| self.freeze_rec(*a)).collect())
        } else {
            None
        };
        let input = GenInput {
            args,
            frozen_args,
            arg_value,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| (make)(self, &input)));
        let root = match outcome {
            Ok(root) => root,
            Err(_) => {
                warn!(node = %id, "generator callback panicked; substituting empty node");
                self.add("generated-fallback")
            }
        };
        if let ContentsKind::Gen(g) = &mut self.node_mut(id).contents_mut().kind {
            g.produced = Some(root);
            g.pending_job = false;
        }
        root
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::PendingExistence { nt, slot, spec, qty } => {
                self.run_pending_existence(nt, slot, spec, qty);
            }
            Job::SizeSyncPatch { node } => {
                let Some(sync) = self.node(node).contents().meta.syncs.size else {
                    return;
                };
                let Some(size) = resolve_size(&self.env, &sync) else {
                    warn!(node = %node, "size sync still unresolvable after drawing siblings");
                    return;
                };
                let c = self.node_mut(node).contents_mut();
                c.meta.frozen = None;
                if let ContentsKind::Typed(t) = &mut c.kind {
                    let _ = t.vt.set_u64(u64::try_from(size).unwrap_or(u64::MAX));
                }
            }
            Job::TriggerLastGen { node } => {
                if let ContentsKind::Gen(g) = &mut self.node_mut(node).contents_mut().kind {
                    g.pending_job = false;
                }
                let root = self.run_generator(node);
                let _ = self.freeze_rec(root);
            }
        }
    }

    /// Current value of `id` read as an unsigned integer (sync lookups).
    pub(crate) fn value_u64(&self, id: NodeId) -> Option<u64> {
        match &self.node(id).contents().kind {
            ContentsKind::Typed(t) => t.vt.as_u64(),
            _ => None,
        }
    }

    /// Current frozen bytes of `id` (condition value comparisons).
    pub(crate) fn value_bytes(&self, id: NodeId) -> Option<Vec<u8>> {
        self.node(id).contents().meta.frozen.clone()
    }

    /// Clears memoized state so the next freeze recomputes.
    ///
    /// The default options advance the deterministic walk to the next
    /// structural variant; see [`UnfreezeOpts`] for the preservation and
    /// constraint-re-evaluation modes.
    pub fn unfreeze(&mut self, id: NodeId, opts: UnfreezeOpts) {
        let mut visited = FxHashSet::default();
        self.unfreeze_walk(id, opts, &mut visited);
    }

    fn unfreeze_walk(&mut self, id: NodeId, opts: UnfreezeOpts, visited: &mut FxHashSet<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        let mut descend: Vec<NodeId> = Vec::new();
        {
            let c = self.node_mut(id).contents_mut();
            match &mut c.kind {
                ContentsKind::Empty => {
                    c.meta.frozen = None;
                }
                ContentsKind::Typed(t) => {
                    if opts.only_generators {
                        // untouched
                    } else {
                        c.meta.frozen = None;
                        if opts.dont_change_state || opts.reevaluate_constraints {
                            t.vt.rewind();
                        }
                    }
                }
                ContentsKind::Func(_) => {
                    if !opts.only_generators {
                        c.meta.frozen = None;
                    }
                }
                ContentsKind::Gen(g) => {
                    c.meta.frozen = None;
                    if opts.only_generators {
                        g.produced = None;
                        g.pending_job = false;
                    } else if let Some(root) = g.produced {
                        descend.push(root);
                    }
                }
                ContentsKind::NonTerm(nt) => {
                    if let Some(frozen) = &nt.frozen {
                        descend.extend(frozen.children.iter().copied());
                    }
                    if opts.only_generators || opts.dont_change_state {
                        // keep the realized child list; bytes recompute on
                        // the next freeze anyway
                    } else {
                        if opts.reevaluate_constraints {
                            if let Some(cur) = nt.current.as_mut() {
                                cur.walk.step_back();
                            }
                        }
                        nt.frozen = None;
                    }
                }
            }
        }
        if !opts.only_generators && !opts.dont_change_state {
            // Descriptor-level drawn records are stale once the realization
            // is discarded.
            let descriptors: Vec<NodeId> = match &self.node(id).contents().kind {
                ContentsKind::NonTerm(nt) => nt.all_child_nodes(),
                _ => Vec::new(),
            };
            for d in descriptors {
                self.env.clear_drawn(d);
            }
        }
        if opts.recursive {
            for child in descend {
                self.unfreeze_walk(child, opts, visited);
            }
        }
    }

    /// Full reset: contents state, drawn records, exhaustion latches, for
    /// `id` and everything reachable from it.
    pub fn reset_state(&mut self, id: NodeId) {
        let mut visited = FxHashSet::default();
        self.reset_walk(id, &mut visited);
    }

    fn reset_walk(&mut self, id: NodeId, visited: &mut FxHashSet<NodeId>) {
        if !visited.insert(id) {
            return;
        }
        let mut descend: Vec<NodeId> = Vec::new();
        {
            let node = self.node_mut(id);
            for contents in node.confs.values_mut() {
                match &contents.kind {
                    ContentsKind::NonTerm(nt) => {
                        descend.extend(nt.all_child_nodes());
                        if let Some(sep) = &nt.separator {
                            descend.push(sep.node);
                        }
                        if let Some(frozen) = &nt.frozen {
                            descend.extend(frozen.children.iter().copied());
                        }
                    }
                    ContentsKind::Gen(g) => {
                        if let Some(root) = g.produced {
                            descend.push(root);
                        }
                    }
                    _ => {}
                }
                // reset after traversal info is collected
            }
            for contents in node.confs.values_mut() {
                contents.reset_state();
            }
        }
        self.env.clear_drawn(id);
        self.env.clear_exhausted(id);
        for child in descend {
            self.reset_walk(child, visited);
        }
    }

    /// `true` once `id`'s variant enumeration has covered every variant.
    #[must_use]
    pub fn is_exhausted(&self, id: NodeId) -> bool {
        match &self.node(id).contents().kind {
            ContentsKind::Empty | ContentsKind::Func(_) => true,
            ContentsKind::Typed(t) => t.vt.is_exhausted(),
            ContentsKind::Gen(g) => g.produced.is_some_and(|root| self.is_exhausted(root)),
            ContentsKind::NonTerm(nt) => nt.is_exhausted(),
        }
    }

    fn refresh_depths(&mut self, root: NodeId) {
        let mut visited = FxHashSet::default();
        let mut frontier = vec![(root, 0_u32)];
        while let Some((id, depth)) = frontier.pop() {
            if !visited.insert(id) {
                continue;
            }
            self.node_mut(id).depth = depth;
            match &self.node(id).contents().kind {
                ContentsKind::NonTerm(nt) => {
                    for child in nt.all_child_nodes() {
                        frontier.push((child, depth + 1));
                    }
                    if let Some(sep) = &nt.separator {
                        frontier.push((sep.node, depth + 1));
                    }
                }
                ContentsKind::Gen(g) => {
                    if let Some(produced) = g.produced {
                        frontier.push((produced, depth + 1));
                    }
                }
                _ => {}
            }
        }
    }

    // ── Cloning ─────────────────────────────────────────────────────────

    /// Deep-copies the subgraph rooted at `root` into fresh arena slots,
    /// remapping every internal cross-reference through a copy dictionary.
    ///
    /// Non-owned references (argument bindings, sync targets, entanglement
    /// members) pointing outside the copied region follow
    /// [`CloneOpts::entangle`]: rejected by default, passed through under
    /// [`EntanglePolicy::AcceptExternal`], or filtered by an acceptance
    /// set.
    ///
    /// # Errors
    /// [`GrammarError::ExternalReference`] under the rejecting policies.
    pub fn clone_node(&mut self, root: NodeId, opts: &CloneOpts) -> Result<NodeId, GrammarError> {
        let reachable = self.reachable_owned(root);
        let reachable_set: FxHashSet<NodeId> = reachable.iter().copied().collect();

        // Validate escaping references before allocating anything.
        for &id in &reachable {
            for r in self.non_owned_refs(id) {
                if !reachable_set.contains(&r) {
                    match &opts.entangle {
                        EntanglePolicy::RejectExternal => {
                            return Err(GrammarError::ExternalReference(r));
                        }
                        EntanglePolicy::AcceptExternal => {}
                        EntanglePolicy::AcceptSet(set) => {
                            if !set.contains(&r) {
                                return Err(GrammarError::ExternalReference(r));
                            }
                        }
                    }
                }
            }
            if let Some(set) = self.node(id).entangled {
                for peer in self.entangle.members(set) {
                    if !reachable_set.contains(&peer) {
                        match &opts.entangle {
                            EntanglePolicy::RejectExternal => {
                                return Err(GrammarError::ExternalReference(peer));
                            }
                            EntanglePolicy::AcceptExternal => {}
                            EntanglePolicy::AcceptSet(accept) => {
                                if !accept.contains(&peer) {
                                    return Err(GrammarError::ExternalReference(peer));
                                }
                            }
                        }
                    }
                }
            }
        }

        // Allocate copies, then remap references through the dictionary.
        let mut map: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        for &id in &reachable {
            let copy = self.nodes[id.index()].clone();
            let new_id = NodeId::from_index(self.nodes.len());
            self.nodes.push(copy);
            map.insert(id, new_id);
        }
        let remap = |r: NodeId| map.get(&r).copied().unwrap_or(r);
        for &old in &reachable {
            let new_id = remap(old);
            self.remap_node_refs(new_id, &remap);
        }

        // Entanglement: sets fully inside the subgraph are duplicated
        // among the copies; sets with external members are joined.
        let mut duplicated: FxHashMap<EntangleId, EntangleId> = FxHashMap::default();
        for &old in &reachable {
            let new_id = remap(old);
            let Some(set) = self.nodes[old.index()].entangled else {
                continue;
            };
            let members = self.entangle.members(set);
            let fully_inside = members.iter().all(|m| reachable_set.contains(m));
            if fully_inside {
                if let Some(&dup) = duplicated.get(&set) {
                    self.entangle.add(dup, new_id);
                    self.node_mut(new_id).entangled = Some(dup);
                } else if members.len() >= 2 {
                    let mapped: std::collections::BTreeSet<NodeId> =
                        members.iter().map(|m| remap(*m)).collect();
                    let dup = self.entangle.create(mapped);
                    duplicated.insert(set, dup);
                    self.node_mut(new_id).entangled = Some(dup);
                } else {
                    self.node_mut(new_id).entangled = None;
                }
            } else {
                // Externals allowed by policy: the copy joins the original
                // shared set.
                self.entangle.add(set, new_id);
                self.node_mut(new_id).entangled = Some(set);
            }
        }

        let new_root = remap(root);
        if opts.ignore_frozen {
            for &old in &reachable {
                let new_id = remap(old);
                for contents in self.node_mut(new_id).confs.values_mut() {
                    contents.reset_state();
                }
            }
        } else {
            // Copies keep the per-pass records of their originals.
            self.env.mirror_records(&map);
        }
        if let Some(name) = &opts.new_name {
            self.node_mut(new_root).name = name.clone();
        }
        Ok(new_root)
    }

    /// Duplicates the whole graph: nodes, entanglement sets, and the
    /// environment (pending jobs excluded). Arena indices are preserved, so
    /// the copy dictionary is the identity and every `NodeId` stays valid
    /// against the duplicate.
    #[must_use]
    pub fn duplicate(&self, seed: u64) -> Self {
        Self {
            nodes: self.nodes.clone(),
            entangle: self.entangle.clone(),
            env: self.env.duplicated(),
            rng: StdRng::seed_from_u64(seed),
            expansion_depth: 0,
        }
    }

    /// Nodes reachable from `root` through *owning* edges: container child
    /// descriptors, separators, realized children, generator products.
    fn reachable_owned(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            for contents in self.nodes[id.index()].confs.values() {
                match &contents.kind {
                    ContentsKind::NonTerm(nt) => {
                        stack.extend(nt.all_child_nodes());
                        if let Some(sep) = &nt.separator {
                            stack.push(sep.node);
                        }
                        if let Some(frozen) = &nt.frozen {
                            stack.extend(frozen.children.iter().copied());
                        }
                    }
                    ContentsKind::Gen(g) => {
                        if let Some(produced) = g.produced {
                            stack.push(produced);
                        }
                    }
                    _ => {}
                }
            }
        }
        order
    }

    /// Non-owned references of `id`: argument bindings and sync targets.
    fn non_owned_refs(&self, id: NodeId) -> Vec<NodeId> {
        let mut refs = Vec::new();
        for contents in self.nodes[id.index()].confs.values() {
            match &contents.kind {
                ContentsKind::Func(f) => refs.extend(f.args.iter().copied()),
                ContentsKind::Gen(g) => refs.extend(g.args.iter().copied()),
                _ => {}
            }
            let syncs = &contents.meta.syncs;
            if let Some(s) = &syncs.qty {
                refs.push(s.target);
            }
            if let Some(s) = &syncs.qty_from {
                refs.push(s.target);
            }
            if let Some(s) = &syncs.size {
                refs.push(s.target);
            }
            if let Some(c) = &syncs.existence {
                refs.extend(cond_targets(c));
            }
            if let Some(c) = &syncs.inexistence {
                refs.extend(cond_targets(c));
            }
        }
        refs
    }

    fn remap_node_refs(&mut self, id: NodeId, remap: &impl Fn(NodeId) -> NodeId) {
        let node = &mut self.nodes[id.index()];
        for contents in node.confs.values_mut() {
            match &mut contents.kind {
                ContentsKind::NonTerm(nt) => {
                    for shape in &mut nt.shapes {
                        for frag in &mut shape.fragments {
                            for entry in &mut frag.entries {
                                entry.node = remap(entry.node);
                            }
                        }
                    }
                    if let Some(sep) = &mut nt.separator {
                        sep.node = remap(sep.node);
                    }
                    if let Some(frozen) = &mut nt.frozen {
                        for child in &mut frozen.children {
                            *child = remap(*child);
                        }
                    }
                    nt.saved_frozen = None;
                }
                ContentsKind::Func(f) => {
                    for a in &mut f.args {
                        *a = remap(*a);
                    }
                }
                ContentsKind::Gen(g) => {
                    for a in &mut g.args {
                        *a = remap(*a);
                    }
                    if let Some(p) = &mut g.produced {
                        *p = remap(*p);
                    }
                }
                ContentsKind::Empty | ContentsKind::Typed(_) => {}
            }
            let syncs = &mut contents.meta.syncs;
            if let Some(s) = &mut syncs.qty {
                s.target = remap(s.target);
            }
            if let Some(s) = &mut syncs.qty_from {
                s.target = remap(s.target);
            }
            if let Some(s) = &mut syncs.size {
                s.target = remap(s.target);
            }
            if let Some(c) = &mut syncs.existence {
                remap_cond(c, remap);
            }
            if let Some(c) = &mut syncs.inexistence {
                remap_cond(c, remap);
            }
            contents.meta.saved_frozen = None;
        }
    }

    // ── Definition checks ───────────────────────────────────────────────

    fn check_shapes(&self, shapes: &[Shape]) -> Result<(), GrammarError> {
        let mut names: FxHashMap<String, NodeId> = FxHashMap::default();
        for shape in shapes {
            // Every pick entry participates in the checks, so flatten
            // without a selection.
            for planned in crate::nonterm::flatten(shape, None) {
                let entry = planned.spec;
                if entry.min > entry.max {
                    return Err(GrammarError::MalformedQuantityRange {
                        name: self.node(entry.node).name().to_owned(),
                        min: entry.min,
                        max: entry.max,
                    });
                }
                let name = self.node(entry.node).name().to_owned();
                match names.get(&name) {
                    Some(&prior) if prior != entry.node => {
                        return Err(GrammarError::DuplicateSiblingName(name));
                    }
                    _ => {
                        names.insert(name, entry.node);
                    }
                }
            }
        }
        Ok(())
    }

    fn check_separator(
        &self,
        shapes: &[Shape],
        sep_node: NodeId,
        sep_name: &str,
    ) -> Result<(), GrammarError> {
        for shape in shapes {
            for frag in &shape.fragments {
                for entry in &frag.entries {
                    if entry.node != sep_node && self.node(entry.node).name() == sep_name {
                        return Err(GrammarError::SeparatorNameCollision(sep_name.to_owned()));
                    }
                }
            }
        }
        Ok(())
    }
}

fn cond_targets(cond: &ExistenceCond) -> Vec<NodeId> {
    match cond {
        ExistenceCond::Present(t) => vec![*t],
        ExistenceCond::ValueEq { target, .. } => vec![*target],
        ExistenceCond::And(subs) | ExistenceCond::Or(subs) => {
            subs.iter().flat_map(cond_targets).collect()
        }
    }
}

fn remap_cond(cond: &mut ExistenceCond, remap: &impl Fn(NodeId) -> NodeId) {
    match cond {
        ExistenceCond::Present(t) => *t = remap(*t),
        ExistenceCond::ValueEq { target, .. } => *target = remap(*target),
        ExistenceCond::And(subs) | ExistenceCond::Or(subs) => {
            for sub in subs {
                remap_cond(sub, remap);
            }
        }
    }
}
