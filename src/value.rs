//! Tagged words.
//!
//! Every slot that can hold an object reference holds a full pointer-sized
//! word whose two low bits say what it is. This module only classifies
//! words; it never reads memory.

use crate::ObjectError;

/// One word, classified.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TaggedValue {
    /// Small integer stored inline.
    Immediate(i64),
    /// Address of an object that keeps the target alive.
    StrongRef(u64),
    /// Address of an object that does not.
    WeakRef(u64),
    /// A weak reference whose target has been collected.
    ClearedWeakRef,
}

impl TaggedValue {
    /// The object address, for the two reference variants.
    pub fn address(self) -> Option<u64> {
        match self {
            Self::StrongRef(a) | Self::WeakRef(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_weak(self) -> bool {
        matches!(self, Self::WeakRef(_) | Self::ClearedWeakRef)
    }
}

const TAG_MASK: u64 = 0b11;
const STRONG_TAG: u64 = 0b01;
const WEAK_TAG: u64 = 0b11;

/// Parameters of the tag scheme that vary between builds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TagScheme {
    /// Width of a word in bytes, 4 or 8.
    pub word_size: u64,
    /// Arithmetic right shift that recovers an immediate's value.
    pub immediate_shift: u32,
    /// Low 32 bits of a cleared weak reference.
    pub cleared_weak_sentinel: u32,
}

impl TagScheme {
    /// The usual scheme for a given word width: immediates live in the upper
    /// half of 8-byte words and above a single tag bit in 4-byte words.
    pub fn for_word_size(word_size: u64) -> Self {
        Self {
            word_size,
            immediate_shift: if word_size == 8 { 32 } else { 1 },
            cleared_weak_sentinel: 3,
        }
    }

    /// Classifies a word.
    ///
    /// A clear low bit is an immediate, whatever the second bit says. For
    /// 4-byte words only the low 32 bits of `word` are considered.
    pub fn classify(&self, word: u64) -> TaggedValue {
        let word = if self.word_size == 4 {
            word & 0xffff_ffff
        } else {
            word
        };

        if word & 1 == 0 {
            let signed = if self.word_size == 4 {
                i64::from(word as u32 as i32)
            } else {
                word as i64
            };
            // Shifting out every bit leaves only the sign.
            let v = signed
                .checked_shr(self.immediate_shift)
                .unwrap_or(signed >> 63);
            return TaggedValue::Immediate(v);
        }

        match word & TAG_MASK {
            STRONG_TAG => TaggedValue::StrongRef(word & !TAG_MASK),
            _ if word as u32 == self.cleared_weak_sentinel => TaggedValue::ClearedWeakRef,
            _ => TaggedValue::WeakRef(word & !TAG_MASK),
        }
    }

    /// Classifies a word that must be a strong reference, returning its
    /// address.
    pub fn strong_address(&self, word: u64) -> Result<u64, ObjectError> {
        match self.classify(word) {
            TaggedValue::StrongRef(a) => Ok(a),
            _ => Err(ObjectError::NotAReference { word }),
        }
    }

    /// Produces the word for a value. Addresses are assumed aligned.
    pub fn encode(&self, v: TaggedValue) -> u64 {
        let word = match v {
            TaggedValue::Immediate(i) => i.checked_shl(self.immediate_shift).unwrap_or(0) as u64,
            TaggedValue::StrongRef(a) => a | STRONG_TAG,
            TaggedValue::WeakRef(a) => a | WEAK_TAG,
            TaggedValue::ClearedWeakRef => u64::from(self.cleared_weak_sentinel),
        };
        if self.word_size == 4 {
            word & 0xffff_ffff
        } else {
            word
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn every_low_pattern_has_one_class() {
        for scheme in [TagScheme::for_word_size(8), TagScheme::for_word_size(4)] {
            for high in [0u64, 0x1234_5670, 0xffff_fff0, 0x0000_7f00_dead_bee0] {
                let classes: Vec<_> = (0..4u64)
                    .map(|low| scheme.classify(high | low))
                    .collect();
                assert!(matches!(classes[0], TaggedValue::Immediate(_)));
                assert!(matches!(classes[1], TaggedValue::StrongRef(_)));
                assert!(matches!(classes[2], TaggedValue::Immediate(_)));
                assert!(matches!(
                    classes[3],
                    TaggedValue::WeakRef(_) | TaggedValue::ClearedWeakRef
                ));
            }
        }
    }

    #[test]
    fn immediates_shift_arithmetically() {
        let s = TagScheme::for_word_size(8);
        assert_eq!(s.classify(42 << 32), TaggedValue::Immediate(42));
        assert_eq!(s.classify((-7i64 << 32) as u64), TaggedValue::Immediate(-7));

        let s = TagScheme::for_word_size(4);
        assert_eq!(s.classify(84), TaggedValue::Immediate(42));
        assert_eq!(s.classify(0xffff_fffe), TaggedValue::Immediate(-1));
    }

    #[test]
    fn oversized_shifts_keep_the_sign() {
        let s = TagScheme {
            immediate_shift: 64,
            ..TagScheme::for_word_size(8)
        };
        assert_eq!(s.classify(0x10), TaggedValue::Immediate(0));
        assert_eq!(s.classify(u64::MAX - 1), TaggedValue::Immediate(-1));
        assert_eq!(s.encode(TaggedValue::Immediate(5)), 0);
    }

    #[test]
    fn references_drop_tag_bits() {
        let s = TagScheme::for_word_size(8);
        assert_eq!(s.classify(0x1000_0001), TaggedValue::StrongRef(0x1000_0000));
        assert_eq!(s.classify(0x1000_0003), TaggedValue::WeakRef(0x1000_0000));
        assert_eq!(s.strong_address(0x2001), Ok(0x2000));
        assert_eq!(
            s.strong_address(0x2003),
            Err(ObjectError::NotAReference { word: 0x2003 }),
        );
    }

    #[test]
    fn cleared_sentinel_checks_low_half_only() {
        let s = TagScheme::for_word_size(8);
        assert_eq!(s.classify(3), TaggedValue::ClearedWeakRef);
        assert_eq!(s.classify(0x5_0000_0003), TaggedValue::ClearedWeakRef);
        assert_eq!(s.classify(0x7), TaggedValue::WeakRef(0x4));
        assert_eq!(TaggedValue::ClearedWeakRef.address(), None);
    }

    #[test]
    fn encode_matches_classify() {
        let s = TagScheme::for_word_size(8);
        for v in [
            TaggedValue::Immediate(-5),
            TaggedValue::StrongRef(0x4_0000),
            TaggedValue::WeakRef(0x4_0000),
            TaggedValue::ClearedWeakRef,
        ] {
            assert_eq!(s.classify(s.encode(v)), v);
        }
    }
}
