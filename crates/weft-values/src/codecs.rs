// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Byte codecs for encoded containers.

use weft_core::Codec;

/// Lowercase hex text codec.
///
/// The consumable region is the longest even-length prefix of hex digits,
/// so absorption can delimit the encoded region without decoding first.
#[derive(Debug, Clone, Default)]
pub struct HexCodec;

impl Codec for HexCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        hex::encode(data).into_bytes()
    }

    fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(data).ok()?;
        hex::decode(text).ok()
    }

    fn how_much_can_be_consumed(&self, blob: &[u8]) -> Option<usize> {
        let digits = blob
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        Some(digits - (digits % 2))
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}

/// u32 big-endian length-prefix framing.
///
/// Encoding prepends the payload length; the consumable region is
/// therefore exactly determinable from the first four bytes.
#[derive(Debug, Clone, Default)]
pub struct PrefixLenCodec;

impl PrefixLenCodec {
    const HEADER: usize = 4;

    fn payload_len(blob: &[u8]) -> Option<usize> {
        if blob.len() < Self::HEADER {
            return None;
        }
        let mut raw = [0_u8; 4];
        raw.copy_from_slice(&blob[..Self::HEADER]);
        usize::try_from(u32::from_be_bytes(raw)).ok()
    }
}

impl Codec for PrefixLenCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
        let mut out = len.to_be_bytes().to_vec();
        out.extend_from_slice(data);
        out
    }

    fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
        let len = Self::payload_len(data)?;
        let body = data.get(Self::HEADER..Self::HEADER + len)?;
        Some(body.to_vec())
    }

    fn how_much_can_be_consumed(&self, blob: &[u8]) -> Option<usize> {
        let len = Self::payload_len(blob)?;
        let total = Self::HEADER + len;
        (blob.len() >= total).then_some(total)
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
