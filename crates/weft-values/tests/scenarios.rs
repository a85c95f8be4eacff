// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end grammar scenarios with concrete leaves and codecs.
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use weft_core::{
    AbsCsts, AbsorbStatus, Attr, ChildSpec, Graph, NodeId, SyncParam, SyncScope, UnfreezeOpts,
};
use weft_values::{BytesValue, Endian, HexCodec, PrefixLenCodec, UIntValue};

/// `[len: u8][data: bytes(2..=5)]` with the length fed from data's size.
fn len_data(graph: &mut Graph) -> (NodeId, NodeId, NodeId) {
    let len = graph.add("len");
    graph.set_values(len, UIntValue::u8(0).boxed());
    let data = graph.add("data");
    graph.set_values(data, BytesValue::sized(2, 5, b'd').boxed());
    let root = graph.add("root");
    graph
        .set_subnodes_ordered(root, vec![ChildSpec::one(len), ChildSpec::one(data)])
        .expect("grammar");
    graph.set_attr(root, Attr::Determinist);
    graph
        .make_synchronized_with(len, SyncScope::Size, data, SyncParam::Base(0))
        .expect("sync");
    (root, len, data)
}

#[test]
fn length_field_tracks_payload_size_on_freeze() {
    let mut graph = Graph::new();
    let (root, _, _) = len_data(&mut graph);
    let bytes = graph.freeze(root);
    assert_eq!(usize::from(bytes[0]), bytes.len() - 1);
}

#[test]
fn length_prefixed_payload_round_trips() {
    let mut gen = Graph::new();
    let (root, _, _) = len_data(&mut gen);
    let bytes = gen.freeze(root);

    let mut parse = Graph::new();
    let (root2, len2, data2) = len_data(&mut parse);
    let out = parse.absorb(root2, &bytes, AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::FullyAbsorbed);
    // The absorbed split matches: len's value equals data's byte count.
    let len_drawn = parse.env().drawn(len2).and_then(|d| d.size);
    let data_drawn = parse.env().drawn(data2).and_then(|d| d.size);
    assert_eq!(len_drawn, Some(1));
    assert_eq!(data_drawn, Some(bytes.len() - 1));
    assert_eq!(parse.freeze(root2), bytes);
}

#[test]
fn inconsistent_length_field_rejects() {
    let mut graph = Graph::new();
    let (root, _, _) = len_data(&mut graph);
    // Claims 9 payload bytes, supplies 3.
    let out = graph.absorb(root, &[9, b'd', b'd', b'd'], AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::Reject);
    assert_eq!(out.offset, 0);
}

#[test]
fn hex_encoded_container_delimits_itself() {
    let build = |graph: &mut Graph| {
        let item = graph.add("item");
        graph.set_values(item, BytesValue::fixed(*b"hi").boxed());
        let root = graph.add("root");
        graph
            .set_subnodes_ordered(root, vec![ChildSpec::one(item)])
            .expect("grammar");
        graph.set_codec(root, Box::new(HexCodec)).expect("codec");
        graph.set_attr(root, Attr::Determinist);
        root
    };
    let mut gen = Graph::new();
    let root = build(&mut gen);
    let encoded = gen.freeze(root);
    assert_eq!(encoded, b"6869");

    // Trailing non-hex bytes stay unconsumed.
    let mut blob = encoded.clone();
    blob.extend_from_slice(b"ZZ");
    let mut parse = Graph::new();
    let root2 = build(&mut parse);
    let out = parse.absorb(root2, &blob, AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::Absorbed);
    assert_eq!(out.size, encoded.len());
    assert_eq!(parse.freeze(root2), encoded);
}

#[test]
fn length_framed_container_round_trips() {
    let build = |graph: &mut Graph| {
        let item = graph.add("item");
        graph.set_values(item, BytesValue::sized(0, 10, b'x').boxed());
        let root = graph.add("root");
        graph
            .set_subnodes_ordered(root, vec![ChildSpec::one(item)])
            .expect("grammar");
        graph
            .set_codec(root, Box::new(PrefixLenCodec))
            .expect("codec");
        graph.set_attr(root, Attr::Determinist);
        root
    };
    let mut gen = Graph::new();
    let root = build(&mut gen);
    let bytes = gen.freeze(root);
    assert_eq!(&bytes[..4], &[0, 0, 0, 10]);

    let mut parse = Graph::new();
    let root2 = build(&mut parse);
    let out = parse.absorb(root2, &bytes, AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::FullyAbsorbed);

    // With a tail, the frame length bounds the consumed region exactly.
    let mut framed = bytes.clone();
    framed.extend_from_slice(b"TAIL");
    let mut parse2 = Graph::new();
    let root3 = build(&mut parse2);
    let out = parse2.absorb(root3, &framed, AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::Absorbed);
    assert_eq!(out.size, bytes.len());
}

#[test]
fn postponed_name_between_fixed_delimiters() {
    let mut graph = Graph::new();
    let open = graph.add("open");
    graph.set_values(open, BytesValue::fixed(*b"(").boxed());
    let name = graph.add("name");
    graph.set_values(
        name,
        BytesValue::sized(1, 32, b'n')
            .with_alphabet(*b"abcdefghijklmnopqrstuvwxyz")
            .boxed(),
    );
    graph.set_attr(name, Attr::AbsPostpone);
    let close = graph.add("close");
    graph.set_values(close, BytesValue::fixed(*b")").boxed());
    let root = graph.add("root");
    graph
        .set_subnodes_ordered(
            root,
            vec![
                ChildSpec::one(open),
                ChildSpec::one(name),
                ChildSpec::one(close),
            ],
        )
        .expect("grammar");

    let out = graph.absorb(root, b"(payload)", AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::FullyAbsorbed);
    assert_eq!(graph.node(name).contents().frozen(), Some(&b"payload"[..]));
}

#[test]
fn determinist_integer_enumeration_exhausts_through_the_graph() {
    let mut graph = Graph::new();
    let field = graph.add("field");
    graph.set_values(
        field,
        UIntValue::u16(0, Endian::Big).with_values(vec![10, 20, 30]).boxed(),
    );
    graph.set_attr(field, Attr::Determinist);

    let mut seen = Vec::new();
    while !graph.is_exhausted(field) {
        seen.push(graph.freeze(field));
        graph.unfreeze(field, UnfreezeOpts::default());
        assert!(seen.len() <= 8, "enumeration failed to terminate");
    }
    assert_eq!(
        seen,
        vec![vec![0, 10], vec![0, 20], vec![0, 30]]
    );
}

#[test]
fn quantity_synced_records_round_trip() {
    let build = |graph: &mut Graph| {
        let count = graph.add("count");
        graph.set_values(count, UIntValue::u8(2).boxed());
        let rec = graph.add("rec");
        graph.set_values(rec, BytesValue::fixed(*b"r!").boxed());
        let root = graph.add("root");
        graph
            .set_subnodes_ordered(
                root,
                vec![ChildSpec::one(count), ChildSpec::ranged(rec, 0, 8)],
            )
            .expect("grammar");
        graph.set_attr(root, Attr::Determinist);
        graph
            .make_synchronized_with(rec, SyncScope::Qty, count, SyncParam::None)
            .expect("sync");
        root
    };
    let mut gen = Graph::new();
    let root = build(&mut gen);
    let bytes = gen.freeze(root);
    assert_eq!(bytes, [&[2_u8][..], b"r!r!"].concat());

    let mut parse = Graph::new();
    let root2 = build(&mut parse);
    let out = parse.absorb(root2, &bytes, AbsCsts::full());
    assert_eq!(out.status, AbsorbStatus::FullyAbsorbed);
    assert_eq!(parse.freeze(root2), bytes);
}
