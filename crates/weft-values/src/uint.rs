// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-width unsigned integer leaves.

use weft_core::{AbsCsts, AbsorbHints, AbsorbOutcome, ValueType};

/// Byte order of a multi-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// An unsigned integer of width 1, 2, 4, or 8 bytes.
///
/// With a permitted-value list and determinist mode, freezing enumerates
/// the list in order and exhausts after the last entry. Quantity and size
/// synchronization read and write the integer through
/// [`ValueType::as_u64`] / [`ValueType::set_u64`].
#[derive(Debug, Clone)]
pub struct UIntValue {
    width: usize,
    endian: Endian,
    values: Option<Vec<u64>>,
    current: u64,
    determinist: bool,
    cursor: usize,
    exhausted: bool,
    saved: Option<u64>,
    tentative: bool,
}

impl UIntValue {
    /// A one-byte integer.
    #[must_use]
    pub fn u8(value: u8) -> Self {
        Self::new(1, Endian::Big, u64::from(value))
    }

    /// A two-byte integer.
    #[must_use]
    pub fn u16(value: u16, endian: Endian) -> Self {
        Self::new(2, endian, u64::from(value))
    }

    /// A four-byte integer.
    #[must_use]
    pub fn u32(value: u32, endian: Endian) -> Self {
        Self::new(4, endian, u64::from(value))
    }

    /// An eight-byte integer.
    #[must_use]
    pub fn u64(value: u64, endian: Endian) -> Self {
        Self::new(8, endian, value)
    }

    fn new(width: usize, endian: Endian, value: u64) -> Self {
        Self {
            width,
            endian,
            values: None,
            current: value,
            determinist: false,
            cursor: 0,
            exhausted: false,
            saved: None,
            tentative: false,
        }
    }

    /// Restricts the integer to a permitted-value list; the first entry
    /// becomes the current value.
    #[must_use]
    pub fn with_values(mut self, values: Vec<u64>) -> Self {
        if let Some(first) = values.first() {
            self.current = *first;
        }
        self.values = Some(values);
        self
    }

    /// Boxes the value for [`weft_core::Graph::set_values`].
    #[must_use]
    pub fn boxed(self) -> Box<dyn ValueType> {
        Box::new(self)
    }

    fn mask(&self) -> u64 {
        if self.width >= 8 {
            u64::MAX
        } else {
            (1 << (self.width * 8)) - 1
        }
    }

    fn encode(&self, value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        match self.endian {
            Endian::Big => bytes[8 - self.width..].to_vec(),
            Endian::Little => {
                let mut out = bytes[8 - self.width..].to_vec();
                out.reverse();
                out
            }
        }
    }

    fn decode(&self, raw: &[u8]) -> u64 {
        let mut value = 0_u64;
        match self.endian {
            Endian::Big => {
                for b in raw {
                    value = (value << 8) | u64::from(*b);
                }
            }
            Endian::Little => {
                for b in raw.iter().rev() {
                    value = (value << 8) | u64::from(*b);
                }
            }
        }
        value
    }
}

impl ValueType for UIntValue {
    fn get_value(&mut self) -> Vec<u8> {
        if self.determinist {
            if let Some(values) = &self.values {
                if let Some(v) = values.get(self.cursor) {
                    self.current = *v;
                }
                if self.cursor + 1 >= values.len() {
                    self.exhausted = true;
                } else {
                    self.cursor += 1;
                }
            } else {
                self.exhausted = true;
            }
        }
        self.encode(self.current)
    }

    fn absorb_auto_helper(&self, blob: &[u8], csts: AbsCsts, hints: &AbsorbHints) -> AbsorbOutcome {
        if blob.len() < self.width {
            return AbsorbOutcome::reject();
        }
        let permitted = self.values.as_ref().filter(|_| csts.contents());
        let Some(permitted) = permitted else {
            return AbsorbOutcome::absorbed(0, self.width);
        };
        let limit = if hints.scan_ahead {
            blob.len() - self.width
        } else {
            0
        };
        (0..=limit)
            .find(|&off| permitted.contains(&self.decode(&blob[off..off + self.width])))
            .map_or_else(AbsorbOutcome::reject, |off| {
                AbsorbOutcome::absorbed(off, self.width)
            })
    }

    fn do_absorb(&mut self, blob: &[u8], offset: usize, size: usize) -> Vec<u8> {
        let raw = blob[offset..offset + size].to_vec();
        if !self.tentative {
            self.saved = Some(self.current);
            self.tentative = true;
        }
        self.current = self.decode(&raw);
        raw
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
        if let Some(values) = &self.values {
            if let Some(first) = values.first() {
                self.current = *first;
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
        Some(self.current)
    }

    fn set_u64(&mut self, value: u64) -> bool {
        self.current = value & self.mask();
        true
    }

    fn clone_box(&self) -> Box<dyn ValueType> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_and_endianness_encode_correctly() {
        let mut be = UIntValue::u16(0x1234, Endian::Big);
        assert_eq!(be.get_value(), vec![0x12, 0x34]);
        let mut le = UIntValue::u16(0x1234, Endian::Little);
        assert_eq!(le.get_value(), vec![0x34, 0x12]);
        let mut one = UIntValue::u8(7);
        assert_eq!(one.get_value(), vec![7]);
    }

    #[test]
    fn determinist_enumeration_exhausts_after_the_list() {
        let mut v = UIntValue::u8(0).with_values(vec![1, 2, 3]);
        v.make_determinist();
        assert_eq!(v.get_value(), vec![1]);
        assert!(!v.is_exhausted());
        assert_eq!(v.get_value(), vec![2]);
        assert_eq!(v.get_value(), vec![3]);
        assert!(v.is_exhausted());
    }

    #[test]
    fn rewind_steps_the_cursor_back() {
        let mut v = UIntValue::u8(0).with_values(vec![1, 2]);
        v.make_determinist();
        let first = v.get_value();
        v.rewind();
        assert_eq!(v.get_value(), first);
    }

    #[test]
    fn absorb_respects_the_permitted_list() {
        let v = UIntValue::u8(0).with_values(vec![5, 9]);
        let hints = AbsorbHints::default();
        let hit = v.absorb_auto_helper(&[9, 0], AbsCsts::full(), &hints);
        assert_eq!(hit, AbsorbOutcome::absorbed(0, 1));
        let miss = v.absorb_auto_helper(&[7, 0], AbsCsts::full(), &hints);
        assert!(!miss.accepted());
        // Lenient contents constraints accept any value.
        let lenient = v.absorb_auto_helper(&[7, 0], AbsCsts::full().with_contents(false), &hints);
        assert!(lenient.accepted());
    }

    #[test]
    fn two_phase_absorb_reverts_and_commits() {
        let mut v = UIntValue::u16(0xAAAA, Endian::Big);
        v.do_absorb(&[0x12, 0x34], 0, 2);
        assert_eq!(v.as_u64(), Some(0x1234));
        v.do_revert_absorb();
        assert_eq!(v.as_u64(), Some(0xAAAA));
        v.do_absorb(&[0x56, 0x78], 0, 2);
        v.do_cleanup_absorb();
        assert_eq!(v.as_u64(), Some(0x5678));
    }

    #[test]
    fn set_u64_masks_to_the_width() {
        let mut v = UIntValue::u8(0);
        assert!(v.set_u64(0x1FF));
        assert_eq!(v.as_u64(), Some(0xFF));
    }
}
