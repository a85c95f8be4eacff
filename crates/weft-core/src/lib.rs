// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weft-core: declarative grammar graph engine.
//!
//! A grammar is a graph of typed nodes: fixed leaf values, computed values,
//! lazily generated sub-graphs, and structural containers with weighted
//! alternation, repetition ranges, and separators. The engine freezes a
//! graph into concrete bytes, enumerates its structural variants
//! deterministically (odometer-style combinatorial walks), and absorbs raw
//! byte blobs back into the graph with full backtracking and two-phase
//! rollback.
//!
//! Leaf value types and byte codecs are plugins behind the [`ValueType`]
//! and [`Codec`] contracts; concrete implementations live outside this
//! crate.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cognitive_complexity,
    clippy::option_if_let_else,
    clippy::significant_drop_tightening,
    clippy::doc_markdown,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    clippy::too_long_first_doc_paragraph,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::trivially_copy_pass_by_ref,
    clippy::needless_collect,
    clippy::manual_let_else,
    clippy::needless_pass_by_value
)]

mod absorb;
mod attrs;
mod codec;
mod contents;
mod csts;
mod entangle;
mod env;
mod expand;
mod graph;
mod ident;
mod jobs;
mod node;
mod nonterm;
mod query;
mod sync;
mod vt;

/// Node attribute flags steering determinism, finiteness, postponing.
pub use attrs::{Attr, Attributes};
/// Byte codec plugin contract for encoded containers.
pub use codec::Codec;
/// Content variant types and the callback contracts for computed and
/// generated nodes.
pub use contents::{
    Contents, ContentsKind, FnInput, FuncContents, GenContents, GenInput, GeneratorFn, NodeFn,
    TypedContents,
};
/// Absorption contract types: constraint flags, hints, statuses.
pub use csts::{AbsCsts, AbsorbHints, AbsorbOutcome, AbsorbStatus};
/// Per-graph environment: drawn attributes, corruption hooks.
pub use env::{CorruptHook, DrawnAttrs, Env};
/// The grammar graph arena and its operations.
pub use graph::{CloneOpts, EntanglePolicy, Graph, GrammarError, UnfreezeOpts};
/// Identifier types.
pub use ident::{EntangleId, NodeId, MAIN_CONF};
/// Deferred-job priority buckets.
pub use jobs::JobPriority;
/// The node record.
pub use node::Node;
/// Structural container building blocks.
pub use nonterm::{ChildSpec, DupMode, Fragment, FragmentKind, NonTerm, SeparatorSpec, Shape};
/// Synchronization relations between sibling nodes.
pub use sync::{ExistenceCond, QtySync, SizeSync, SyncParam, SyncRelations, SyncScope};
/// Leaf value-type plugin contract.
pub use vt::ValueType;
