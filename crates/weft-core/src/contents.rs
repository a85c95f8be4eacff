// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Content variants: the behavioral kinds a node's contents can take.
//!
//! A node maps each of its configurations to one [`Contents`]: a shared
//! [`Meta`] header (attributes, sync relations, absorption overrides, the
//! memoized frozen value) plus the variant-specific state. Dispatch is a
//! plain `match` over [`ContentsKind`]; the container-only combinatorics
//! live in [`crate::nonterm`].

use crate::attrs::{Attr, Attributes};
use crate::csts::AbsCsts;
use crate::graph::Graph;
use crate::ident::NodeId;
use crate::nonterm::NonTerm;
use crate::sync::SyncRelations;
use crate::vt::ValueType;

/// Callback computing a byte value from its inputs.
///
/// Functions are stateless across freezes: the same inputs produce the same
/// bytes. In frozen-args mode the arguments arrive pre-serialized in
/// [`FnInput::frozen_args`]; in live-args mode the callback receives the
/// argument node ids and a read-only graph to inspect them.
pub type NodeFn = fn(&FnInput<'_>) -> Vec<u8>;

/// Callback lazily producing an entire replacement sub-graph.
///
/// The generator constructs nodes directly into the graph and returns the
/// root of the produced sub-graph; the engine memoizes that root until the
/// generator is reset.
pub type GeneratorFn = fn(&mut Graph, &GenInput) -> NodeId;

/// Inputs handed to a [`NodeFn`].
#[derive(Debug)]
pub struct FnInput<'a> {
    /// Read-only view of the owning graph (live-args mode inspection).
    pub graph: &'a Graph,
    /// Argument node ids, in binding order.
    pub args: &'a [NodeId],
    /// Serialized argument values; populated only in frozen-args mode.
    pub frozen_args: Option<&'a [Vec<u8>]>,
    /// Constant argument bound at construction time.
    pub arg_value: Option<&'a [u8]>,
}

/// Inputs handed to a [`GeneratorFn`]. Owned, because the generator also
/// receives the graph mutably.
#[derive(Debug, Clone)]
pub struct GenInput {
    /// Argument node ids, in binding order.
    pub args: Vec<NodeId>,
    /// Serialized argument values; populated only in frozen-args mode.
    pub frozen_args: Option<Vec<Vec<u8>>>,
    /// Constant argument bound at construction time.
    pub arg_value: Option<Vec<u8>>,
}

/// Shared header carried by every contents variant.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    /// Attribute flags.
    pub(crate) attrs: Attributes,
    /// Sync relations attached to this contents.
    pub(crate) syncs: SyncRelations,
    /// Absorption constraint override pinned on this node, if any.
    pub(crate) abs_csts: Option<AbsCsts>,
    /// Memoized frozen value; cleared by unfreeze.
    pub(crate) frozen: Option<Vec<u8>>,
    /// Value saved when an absorption attempt tentatively replaced
    /// `frozen`; restored on cancel, dropped on confirm.
    pub(crate) saved_frozen: Option<Option<Vec<u8>>>,
}

/// Leaf contents wrapping one external value type.
#[derive(Debug, Clone)]
pub struct TypedContents {
    /// The wrapped value type.
    pub(crate) vt: Box<dyn ValueType>,
}

/// Computed contents: a function over argument nodes.
#[derive(Debug, Clone)]
pub struct FuncContents {
    /// The computation.
    pub(crate) func: NodeFn,
    /// Argument node bindings.
    pub(crate) args: Vec<NodeId>,
    /// Constant argument.
    pub(crate) arg_value: Option<Vec<u8>>,
    /// Serialize arguments before the call (vs. live node references).
    pub(crate) frozen_args: bool,
}

/// Generator contents: lazily produces a replacement sub-graph.
#[derive(Debug, Clone)]
pub struct GenContents {
    /// The sub-graph builder.
    pub(crate) make: GeneratorFn,
    /// Argument node bindings.
    pub(crate) args: Vec<NodeId>,
    /// Constant argument.
    pub(crate) arg_value: Option<Vec<u8>>,
    /// Serialize arguments before the call (vs. live node references).
    pub(crate) frozen_args: bool,
    /// Memoized produced sub-graph root; cleared on reset.
    pub(crate) produced: Option<NodeId>,
    /// A trigger-last job is already queued for this generator.
    pub(crate) pending_job: bool,
}

/// The variant payload of a [`Contents`].
#[derive(Debug, Clone)]
pub enum ContentsKind {
    /// No value, no children; freezes to nothing and absorbs nothing.
    Empty,
    /// Leaf value type.
    Typed(TypedContents),
    /// Computed value.
    Func(FuncContents),
    /// Lazily generated sub-graph.
    Gen(GenContents),
    /// Structural container.
    NonTerm(Box<NonTerm>),
}

/// One configuration's contents: shared header + variant payload.
#[derive(Debug, Clone)]
pub struct Contents {
    pub(crate) meta: Meta,
    pub(crate) kind: ContentsKind,
}

impl Contents {
    /// Empty contents with default attributes.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            meta: Meta::default(),
            kind: ContentsKind::Empty,
        }
    }

    /// Leaf contents around a value type.
    #[must_use]
    pub fn typed(vt: Box<dyn ValueType>) -> Self {
        Self {
            meta: Meta::default(),
            kind: ContentsKind::Typed(TypedContents { vt }),
        }
    }

    /// Function contents.
    #[must_use]
    pub fn func(
        func: NodeFn,
        args: Vec<NodeId>,
        arg_value: Option<Vec<u8>>,
        frozen_args: bool,
    ) -> Self {
        Self {
            meta: Meta::default(),
            kind: ContentsKind::Func(FuncContents {
                func,
                args,
                arg_value,
                frozen_args,
            }),
        }
    }

    /// Generator contents.
    #[must_use]
    pub fn generator(
        make: GeneratorFn,
        args: Vec<NodeId>,
        arg_value: Option<Vec<u8>>,
        frozen_args: bool,
    ) -> Self {
        Self {
            meta: Meta::default(),
            kind: ContentsKind::Gen(GenContents {
                make,
                args,
                arg_value,
                frozen_args,
                produced: None,
                pending_job: false,
            }),
        }
    }

    /// Container contents.
    #[must_use]
    pub fn nonterm(nt: NonTerm) -> Self {
        Self {
            meta: Meta::default(),
            kind: ContentsKind::NonTerm(Box::new(nt)),
        }
    }

    /// The attribute set.
    #[must_use]
    pub fn attrs(&self) -> Attributes {
        self.meta.attrs
    }

    /// `true` when `attr` is set.
    #[must_use]
    pub fn has_attr(&self, attr: Attr) -> bool {
        self.meta.attrs.has(attr)
    }

    /// The sync relations attached to this contents.
    #[must_use]
    pub fn syncs(&self) -> &SyncRelations {
        &self.meta.syncs
    }

    /// The memoized frozen value, if any.
    #[must_use]
    pub fn frozen(&self) -> Option<&[u8]> {
        self.meta.frozen.as_deref()
    }

    /// Variant payload (read access for callers walking the graph).
    #[must_use]
    pub fn kind(&self) -> &ContentsKind {
        &self.kind
    }

    /// Discards all computed and enumeration state local to this contents.
    ///
    /// Container cursor state and generator memos are cleared; child nodes
    /// are untouched (the graph-level reset walks them).
    pub(crate) fn reset_state(&mut self) {
        self.meta.frozen = None;
        self.meta.saved_frozen = None;
        match &mut self.kind {
            ContentsKind::Empty | ContentsKind::Func(_) => {}
            ContentsKind::Typed(t) => t.vt.reset_state(),
            ContentsKind::Gen(g) => {
                g.produced = None;
                g.pending_job = false;
            }
            ContentsKind::NonTerm(nt) => nt.reset_state(),
        }
    }
}
