// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Byte-string leaves.

use weft_core::{AbsCsts, AbsorbHints, AbsorbOutcome, ValueType};

/// A byte string with a size range and optional contents constraints.
///
/// Absorption precedence: an engine-supplied expected size (from a size
/// sync) pins the consumed length exactly; otherwise a permitted-contents
/// list is matched (scanning forward only under a postponed sibling);
/// otherwise an alphabet restricts a greedy run; otherwise the maximum
/// size is taken greedily.
#[derive(Debug, Clone)]
pub struct BytesValue {
    min_len: usize,
    max_len: usize,
    permitted: Option<Vec<Vec<u8>>>,
    alphabet: Option<Vec<u8>>,
    current: Vec<u8>,
    determinist: bool,
    cursor: usize,
    exhausted: bool,
    saved: Option<Vec<u8>>,
    tentative: bool,
}

impl BytesValue {
    /// A fixed byte string: freezes to `bytes` and absorbs only `bytes`
    /// (a one-entry permitted list).
    #[must_use]
    pub fn fixed(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len();
        Self {
            min_len: len,
            max_len: len,
            permitted: Some(vec![bytes.clone()]),
            alphabet: None,
            current: bytes,
            determinist: false,
            cursor: 0,
            exhausted: false,
            saved: None,
            tentative: false,
        }
    }

    /// A variable-size string filled with `fill`, sized `min..=max`.
    #[must_use]
    pub fn sized(min: usize, max: usize, fill: u8) -> Self {
        Self {
            min_len: min,
            max_len: max,
            permitted: None,
            alphabet: None,
            current: vec![fill; max.max(min)],
            determinist: false,
            cursor: 0,
            exhausted: false,
            saved: None,
            tentative: false,
        }
    }

    /// A string restricted to a permitted-contents list; the first entry
    /// becomes the current value.
    #[must_use]
    pub fn from_list(entries: Vec<Vec<u8>>) -> Self {
        let current = entries.first().cloned().unwrap_or_default();
        let min = entries.iter().map(Vec::len).min().unwrap_or(0);
        let max = entries.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            min_len: min,
            max_len: max,
            permitted: Some(entries),
            alphabet: None,
            current,
            determinist: false,
            cursor: 0,
            exhausted: false,
            saved: None,
            tentative: false,
        }
    }

    /// Restricts absorbed bytes to an alphabet (pattern constraint).
    #[must_use]
    pub fn with_alphabet(mut self, alphabet: impl Into<Vec<u8>>) -> Self {
        self.alphabet = Some(alphabet.into());
        self
    }

    /// Boxes the value for [`weft_core::Graph::set_values`].
    #[must_use]
    pub fn boxed(self) -> Box<dyn ValueType> {
        Box::new(self)
    }

    fn fits(&self, len: usize) -> bool {
        (self.min_len..=self.max_len).contains(&len)
    }

    fn run_ok(&self, slice: &[u8], csts: AbsCsts) -> bool {
        if !csts.regexp() {
            return true;
        }
        self.alphabet
            .as_ref()
            .is_none_or(|alpha| slice.iter().all(|b| alpha.contains(b)))
    }
}

impl ValueType for BytesValue {
    fn get_value(&mut self) -> Vec<u8> {
        if self.determinist {
            if let Some(entries) = &self.permitted {
                if let Some(v) = entries.get(self.cursor) {
                    self.current = v.clone();
                }
                if self.cursor + 1 >= entries.len() {
                    self.exhausted = true;
                } else {
                    self.cursor += 1;
                }
            } else {
                self.exhausted = true;
            }
        }
        self.current.clone()
    }

    fn absorb_auto_helper(&self, blob: &[u8], csts: AbsCsts, hints: &AbsorbHints) -> AbsorbOutcome {
        // 1. Size sync pinned the length exactly.
        if let Some(expected) = hints.expected_size.filter(|_| csts.size()) {
            if blob.len() < expected || !self.run_ok(&blob[..expected], csts) {
                return AbsorbOutcome::reject();
            }
            return AbsorbOutcome::absorbed(0, expected);
        }
        // 2. Permitted contents, scanning only under a postponed sibling.
        if let Some(permitted) = self.permitted.as_ref().filter(|_| csts.contents()) {
            let limit = if hints.scan_ahead { blob.len() } else { 0 };
            for off in 0..=limit {
                if let Some(hit) = permitted
                    .iter()
                    .filter(|p| blob[off..].starts_with(p))
                    .max_by_key(|p| p.len())
                {
                    return AbsorbOutcome::absorbed(off, hit.len());
                }
            }
            return AbsorbOutcome::reject();
        }
        // 3. Alphabet run within the size range.
        if let Some(alpha) = self.alphabet.as_ref().filter(|_| csts.regexp()) {
            let run = blob
                .iter()
                .take(self.max_len)
                .take_while(|b| alpha.contains(b))
                .count();
            if run < self.min_len {
                return AbsorbOutcome::reject();
            }
            return AbsorbOutcome::absorbed(0, run);
        }
        // 4. Greedy within the size range.
        let take = blob.len().min(self.max_len);
        if !self.fits(take) {
            return AbsorbOutcome::reject();
        }
        AbsorbOutcome::absorbed(0, take)
    }

    fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8> {
        let taken = blob[offset..offset + size].to_vec();
        if !self.tentative {
            self.saved = Some(std::mem::take(&mut self.current));
            self.tentative = true;
        }
        self.current = taken.clone();
        taken
    }

    fn do_revert_absorb(&mut self) {
        if let Some(prev) = self.saved.take() {
            self.current = prev;
        }
        self.tentative = false;
    }

    fn do_cleanup_absorb(&mut self) {
        self.saved = None;
        self.tentative = false;
    }

    fn reset_state(&mut self) {
        self.cursor = 0;
        self.exhausted = false;
        self.saved = None;
        self.tentative = false;
        if let Some(entries) = &self.permitted {
            if let Some(first) = entries.first() {
                self.current = first.clone();
            }
        }
    }

    fn rewind(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.exhausted = false;
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn make_determinist(&mut self) {
        self.determinist = true;
    }

    fn make_random(&mut self) {
        self.determinist = false;
    }

    fn as_u64(&self) -> Option<u64> {
        None
    }

    fn clone_box(&self) -> Box<dyn ValueType> {
        Box::new(self.clone())
    }
}
