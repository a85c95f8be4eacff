// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! weft-values: concrete leaf value types and byte codecs for the grammar
//! engine.
//!
//! These implement the `weft-core` plugin contracts: unsigned integers of
//! fixed width with optional permitted-value enumeration, byte strings
//! with size ranges, permitted contents, or alphabet runs, and two codecs
//! (hex text, u32-BE length framing).
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
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::too_long_first_doc_paragraph,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names
)]

mod bytes;
mod codecs;
mod uint;

/// Byte-string leaf with size, contents, and alphabet constraints.
pub use bytes::BytesValue;
/// Hex-text and length-prefix codecs.
pub use codecs::{HexCodec, PrefixLenCodec};
/// Fixed-width unsigned integer leaf.
pub use uint::{Endian, UIntValue};
