// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Function and generator contents, plus the deferred-job machinery that
//! resolves forward references before a top-level freeze returns.
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use common::{Byte, Token};
use weft_core::{
    Attr, ChildSpec, ExistenceCond, GenInput, Graph, NodeId, SyncParam, SyncScope, UnfreezeOpts,
};

#[test]
fn function_concatenates_frozen_arguments() {
    let mut graph = Graph::new();
    let a = graph.add("a");
    graph.set_values(a, Token::new(*b"ab"));
    let b = graph.add("b");
    graph.set_values(b, Token::new(*b"cd"));
    let f = graph.add("f");
    graph.set_function(
        f,
        |input| input.frozen_args.map_or_else(Vec::new, |args| args.concat()),
        vec![a, b],
        None,
    );
    assert_eq!(graph.freeze(f), b"abcd");
}

#[test]
fn live_args_mode_passes_node_references() {
    let mut graph = Graph::new();
    let a = graph.add("a");
    graph.set_values(a, Token::new(*b"live"));
    let f = graph.add("f");
    graph.set_function(
        f,
        |input| {
            // live mode: arguments are inspected through the graph view
            input
                .args
                .iter()
                .flat_map(|id| {
                    input
                        .graph
                        .node(*id)
                        .contents()
                        .frozen()
                        .map_or_else(Vec::new, <[u8]>::to_vec)
                })
                .collect()
        },
        vec![a],
        None,
    );
    graph.set_frozen_args_mode(f, false);
    // The argument has not been frozen yet: the callback sees nothing.
    assert_eq!(graph.freeze(f), b"");
    graph.unfreeze(f, UnfreezeOpts::default());
    let _ = graph.freeze(a);
    assert_eq!(graph.freeze(f), b"live");
}

#[test]
fn constant_argument_reaches_the_callback() {
    let mut graph = Graph::new();
    let f = graph.add("f");
    graph.set_function(
        f,
        |input| input.arg_value.map_or_else(Vec::new, <[u8]>::to_vec),
        Vec::new(),
        Some(b"const".to_vec()),
    );
    assert_eq!(graph.freeze(f), b"const");
}

#[test]
fn function_panic_degrades_to_an_empty_value() {
    let mut graph = Graph::new();
    let f = graph.add("f");
    graph.set_function(f, |_| panic!("plugin bug"), Vec::new(), None);
    assert_eq!(graph.freeze(f), b"");
}

#[test]
fn generator_memoizes_its_subgraph_until_reset() {
    fn make(graph: &mut Graph, _input: &GenInput) -> NodeId {
        let n = graph.add("generated");
        graph.set_values(n, Token::new(*b"G"));
        n
    }
    let mut graph = Graph::new();
    let g = graph.add("g");
    graph.set_generator(g, make, Vec::new(), None);

    let before = graph.len();
    assert_eq!(graph.freeze(g), b"G");
    let after_first = graph.len();
    assert!(after_first > before);

    // Memoized: a second freeze does not regenerate.
    let _ = graph.freeze(g);
    assert_eq!(graph.len(), after_first);

    // Resetting only generators forces a fresh sub-graph.
    graph.unfreeze(
        g,
        UnfreezeOpts {
            only_generators: true,
            ..UnfreezeOpts::default()
        },
    );
    assert_eq!(graph.freeze(g), b"G");
    assert!(graph.len() > after_first);
}

#[test]
fn trigger_last_generator_materializes_after_the_container() {
    fn make(graph: &mut Graph, _input: &GenInput) -> NodeId {
        let n = graph.add("generated");
        graph.set_values(n, Token::new(*b"G"));
        n
    }
    let mut graph = Graph::new();
    let a = graph.add("a");
    graph.set_values(a, Token::new(*b"A"));
    let g = graph.add("g");
    graph.set_generator(g, make, Vec::new(), None);
    graph.set_attr(g, Attr::TriggerLast);
    let root = graph.add("root");
    graph
        .set_subnodes_ordered(root, vec![ChildSpec::one(a), ChildSpec::one(g)])
        .expect("grammar");
    graph.set_attr(root, Attr::Determinist);
    // The generator defers itself during expansion; the job wave
    // materializes it and the returned bytes include its output.
    assert_eq!(graph.freeze(root), b"AG");
}

#[test]
fn forward_existence_reference_resolves_through_a_deferred_job() {
    let build = |flag_value: u8| {
        let mut graph = Graph::new();
        let opt = graph.add("opt");
        graph.set_values(opt, Token::new(*b"OPT"));
        let flag = graph.add("flag");
        graph.set_values(flag, Byte::new(flag_value));
        let root = graph.add("root");
        graph
            .set_subnodes_ordered(root, vec![ChildSpec::one(opt), ChildSpec::one(flag)])
            .expect("grammar");
        graph.set_attr(root, Attr::Determinist);
        // opt's condition references flag, which is drawn *after* it.
        graph
            .make_synchronized_with(
                opt,
                SyncScope::Existence,
                flag,
                SyncParam::Cond(ExistenceCond::ValueEq {
                    target: flag,
                    value: vec![1],
                }),
            )
            .expect("sync");
        (graph, root)
    };

    let (mut present, root) = build(1);
    assert_eq!(present.freeze(root), [b"OPT".as_slice(), &[1]].concat());

    let (mut absent, root) = build(0);
    assert_eq!(absent.freeze(root), vec![0]);
}

#[test]
fn generator_subgraph_participates_in_absorption() {
    fn make(graph: &mut Graph, _input: &GenInput) -> NodeId {
        let n = graph.add("generated");
        graph.set_values(n, Token::new(*b"GEN"));
        n
    }
    let mut graph = Graph::new();
    let g = graph.add("g");
    graph.set_generator(g, make, Vec::new(), None);
    let out = graph.absorb(g, b"GEN", weft_core::AbsCsts::full());
    assert_eq!(out.status, weft_core::AbsorbStatus::FullyAbsorbed);
}
