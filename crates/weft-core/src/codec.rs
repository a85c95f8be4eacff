// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Byte codec plugin contract.
//!
//! A container node may wrap its serialized children in a codec (hex,
//! compression, length framing, ...). Generation passes the concatenated
//! child bytes through [`Codec::encode`]; absorption must first determine
//! how many leading bytes of the blob belong to the encoded region, either
//! exactly via [`Codec::how_much_can_be_consumed`] or by best-effort
//! decoding.

/// Behavior contract for byte codecs attached to container nodes.
pub trait Codec: core::fmt::Debug {
    /// Encodes the serialized child bytes.
    fn encode(&self, data: &[u8]) -> Vec<u8>;

    /// Decodes an encoded region back into child bytes. Returns `None` when
    /// the region is malformed for this codec.
    fn decode(&self, data: &[u8]) -> Option<Vec<u8>>;

    /// When the codec can delimit itself, returns how many leading bytes of
    /// `blob` form a complete encoded region. Codecs that cannot tell
    /// return `None` and absorption falls back to decode-as-much-as-you-can.
    fn how_much_can_be_consumed(&self, blob: &[u8]) -> Option<usize> {
        let _ = blob;
        None
    }

    /// Object-safe clone.
    fn clone_box(&self) -> Box<dyn Codec>;
}

impl Clone for Box<dyn Codec> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
