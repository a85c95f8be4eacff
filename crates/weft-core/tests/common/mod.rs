// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test leaves implementing the public plugin contracts.
#![allow(dead_code)]

use weft_core::{AbsCsts, AbsorbHints, AbsorbOutcome, Codec, ValueType};

/// Fixed byte token. Freezes to its pattern; absorbs only its pattern,
/// scanning forward when a postponed sibling allows it.
#[derive(Debug, Clone)]
pub struct Token {
    pattern: Vec<u8>,
    absorbed: Option<Vec<u8>>,
    committed: Option<Vec<u8>>,
}

impl Token {
    pub fn new(pattern: impl Into<Vec<u8>>) -> Box<dyn ValueType> {
        Box::new(Self {
            pattern: pattern.into(),
            absorbed: None,
            committed: None,
        })
    }
}

impl ValueType for Token {
    fn get_value(&mut self) -> Vec<u8> {
        self.absorbed
            .as_ref()
            .or(self.committed.as_ref())
            .unwrap_or(&self.pattern)
            .clone()
    }

    fn absorb_auto_helper(&self, blob: &[u8], csts: AbsCsts, hints: &AbsorbHints) -> AbsorbOutcome {
        let pat = &self.pattern;
        if blob.len() < pat.len() {
            return AbsorbOutcome::reject();
        }
        if !csts.contents() {
            return AbsorbOutcome::absorbed(0, pat.len());
        }
        let limit = if hints.scan_ahead {
            blob.len() - pat.len()
        } else {
            0
        };
        (0..=limit)
            .find(|&off| blob[off..].starts_with(pat))
            .map_or_else(AbsorbOutcome::reject, |off| {
                AbsorbOutcome::absorbed(off, pat.len())
            })
    }

    fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8> {
        let taken = blob[offset..offset + size].to_vec();
        self.absorbed = Some(taken.clone());
        taken
    }

    fn do_revert_absorb(&mut self) {
        self.absorbed = None;
    }

    fn do_cleanup_absorb(&mut self) {
        if let Some(v) = self.absorbed.take() {
            self.committed = Some(v);
        }
    }

    fn reset_state(&mut self) {
        self.absorbed = None;
        self.committed = None;
    }

    fn rewind(&mut self) {}

    fn is_exhausted(&self) -> bool {
        true
    }

    fn make_determinist(&mut self) {}

    fn make_random(&mut self) {}

    fn clone_box(&self) -> Box<dyn ValueType> {
        Box::new(self.clone())
    }
}

/// One unsigned byte with an integer reading, usable as a length field.
#[derive(Debug, Clone)]
pub struct Byte {
    current: u8,
    absorbed: Option<u8>,
    saved: Option<u8>,
    committed: bool,
}

impl Byte {
    pub fn new(value: u8) -> Box<dyn ValueType> {
        Box::new(Self {
            current: value,
            absorbed: None,
            saved: None,
            committed: false,
        })
    }
}

impl ValueType for Byte {
    fn get_value(&mut self) -> Vec<u8> {
        vec![self.absorbed.unwrap_or(self.current)]
    }

    fn absorb_auto_helper(&self, blob: &[u8], _csts: AbsCsts, _hints: &AbsorbHints) -> AbsorbOutcome {
        if blob.is_empty() {
            AbsorbOutcome::reject()
        } else {
            AbsorbOutcome::absorbed(0, 1)
        }
    }

    fn do_absorb(&mut self, blob: &[u8], offset: usize, _size: usize) -> Vec<u8> {
        if self.saved.is_none() {
            self.saved = Some(self.current);
        }
        self.absorbed = Some(blob[offset]);
        self.current = blob[offset];
        vec![blob[offset]]
    }

    fn do_revert_absorb(&mut self) {
        if let Some(prev) = self.saved.take() {
            self.current = prev;
        }
        self.absorbed = None;
    }

    fn do_cleanup_absorb(&mut self) {
        self.saved = None;
        self.committed = true;
    }

    fn reset_state(&mut self) {
        self.absorbed = None;
        self.saved = None;
        self.committed = false;
    }

    fn rewind(&mut self) {}

    fn is_exhausted(&self) -> bool {
        true
    }

    fn make_determinist(&mut self) {}

    fn make_random(&mut self) {}

    fn as_u64(&self) -> Option<u64> {
        Some(u64::from(self.absorbed.unwrap_or(self.current)))
    }

    fn set_u64(&mut self, value: u64) -> bool {
        self.current = u8::try_from(value.min(255)).unwrap_or(u8::MAX);
        true
    }

    fn clone_box(&self) -> Box<dyn ValueType> {
        Box::new(self.clone())
    }
}

/// Greedy variable-length leaf: freezes to a fixed payload, absorbs any
/// slice it is given in full. Meant for postponed-node tests where the
/// engine supplies the exact gap.
#[derive(Debug, Clone)]
pub struct TakeAll {
    payload: Vec<u8>,
    absorbed: Option<Vec<u8>>,
}

impl TakeAll {
    pub fn new(payload: impl Into<Vec<u8>>) -> Box<dyn ValueType> {
        Box::new(Self {
            payload: payload.into(),
            absorbed: None,
        })
    }
}

impl ValueType for TakeAll {
    fn get_value(&mut self) -> Vec<u8> {
        self.absorbed.as_ref().unwrap_or(&self.payload).clone()
    }

    fn absorb_auto_helper(&self, blob: &[u8], _csts: AbsCsts, _hints: &AbsorbHints) -> AbsorbOutcome {
        AbsorbOutcome::absorbed(0, blob.len())
    }

    fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8> {
        let taken = blob[offset..offset + size].to_vec();
        self.absorbed = Some(taken.clone());
        taken
    }

    fn do_revert_absorb(&mut self) {
        self.absorbed = None;
    }

    fn do_cleanup_absorb(&mut self) {}

    fn reset_state(&mut self) {
        self.absorbed = None;
    }

    fn rewind(&mut self) {}

    fn is_exhausted(&self) -> bool {
        true
    }

    fn make_determinist(&mut self) {}

    fn make_random(&mut self) {}

    fn clone_box(&self) -> Box<dyn ValueType> {
        Box::new(self.clone())
    }
}

/// Symmetric XOR codec: size-preserving, cannot self-delimit.
#[derive(Debug, Clone)]
pub struct XorCodec(pub u8);

impl Codec for XorCodec {
    fn encode(&self, data: &[u8]) -> Vec<u8> {
        data.iter().map(|b| b ^ self.0).collect()
    }

    fn decode(&self, data: &[u8]) -> Option<Vec<u8>> {
        Some(self.encode(data))
    }

    fn clone_box(&self) -> Box<dyn Codec> {
        Box::new(self.clone())
    }
}
