//! REX prefix modeling.

use bitflags::bitflags;

bitflags! {
    /// The four extension bits of a REX prefix byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
    pub struct RexBits: u8 {
        /// 64-bit operand size.
        const W = 0b1000;
        /// High bit of the ModR/M reg field.
        const R = 0b0100;
        /// High bit of the SIB index field.
        const X = 0b0010;
        /// High bit of the ModR/M r/m, SIB base, or opcode register
        /// field.
        const B = 0b0001;
    }
}

/// REX state of one enumeration pass: absent, or present with a
/// particular bit combination. A present REX with all bits clear (byte
/// `0x40`) still switches the 8-bit register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rex {
    present: bool,
    bits: RexBits,
}

impl Rex {
    /// The no-REX case.
    pub const NONE: Rex = Rex {
        present: false,
        bits: RexBits::empty(),
    };

    /// A present REX prefix with the given bits.
    pub fn present(bits: RexBits) -> Rex {
        Rex {
            present: true,
            bits,
        }
    }

    /// All 17 enumeration cases: no REX, then `0x40..=0x4f`.
    pub fn all() -> impl Iterator<Item = Rex> {
        std::iter::once(Rex::NONE)
            .chain((0u8..0x10).map(|bits| Rex::present(RexBits::from_bits_truncate(bits))))
    }

    /// Whether any REX prefix is present.
    pub fn has_rex(self) -> bool {
        self.present
    }

    /// The prefix byte, `0x40..=0x4f`.
    ///
    /// # Panics
    /// Panics in the no-REX case, which has no byte.
    pub fn byte(self) -> u8 {
        assert!(self.present, "the no-REX case has no prefix byte");
        0x40 | self.bits.bits()
    }

    /// REX.W: 64-bit operand size.
    pub fn w(self) -> bool {
        self.bits.contains(RexBits::W)
    }

    /// REX.R.
    pub fn r(self) -> bool {
        self.bits.contains(RexBits::R)
    }

    /// REX.X.
    pub fn x(self) -> bool {
        self.bits.contains(RexBits::X)
    }

    /// REX.B.
    pub fn b(self) -> bool {
        self.bits.contains(RexBits::B)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_covers_no_rex_and_sixteen_prefixes() {
        let cases: Vec<_> = Rex::all().collect();
        assert_eq!(cases.len(), 17);
        assert_eq!(cases[0], Rex::NONE);
        assert!(!cases[0].has_rex());
        assert_eq!(cases[1].byte(), 0x40);
        assert_eq!(cases[16].byte(), 0x4f);
        assert!(cases[16].w() && cases[16].r() && cases[16].x() && cases[16].b());
    }

    #[test]
    fn bit_accessors_match_the_prefix_layout() {
        let rex = Rex::present(RexBits::W | RexBits::B);
        assert_eq!(rex.byte(), 0x49);
        assert!(rex.w());
        assert!(!rex.r());
        assert!(!rex.x());
        assert!(rex.b());
    }
}
