//! Operand shapes of the instruction tables.

/// Operand size, either a bit width or one of the irregular size tags
/// whose memory rendering or register file does not follow from a width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Size {
    /// 8 bits.
    B8,
    /// 16 bits.
    B16,
    /// 32 bits.
    B32,
    /// 64 bits.
    B64,
    /// 80 bits (x87 extended precision / packed BCD).
    B80,
    /// 128 bits.
    B128,
    /// MMX register, size left to the instruction.
    Mmx,
    /// MMX operand reading 32 bits of memory.
    Mmx32,
    /// MMX operand reading 64 bits of memory.
    Mmx64,
    /// Full XMM register.
    Xmm,
    /// XMM operand reading 32 bits of memory.
    Xmm32,
    /// XMM operand reading 64 bits of memory.
    Xmm64,
    /// x87 stack register.
    X87,
    /// `lea` memory operand: never dereferenced, size irrelevant.
    LeaMem,
    /// Prefetch hint operand: unsandboxed, may point anywhere.
    PrefetchMem,
    /// The 512-byte fxsave/fxrstor area.
    FxsaveSize,
    /// x87 environment/state areas of fldenv/fnstenv/frstor/fnsave.
    OtherX87Size,
    /// lddqu source.
    LddquSize,
}

impl Size {
    /// Bit width of a plain immediate of this size.
    pub fn bits(self) -> u32 {
        match self {
            Size::B8 => 8,
            Size::B16 => 16,
            Size::B32 => 32,
            Size::B64 => 64,
            other => panic!("operand size {other:?} has no immediate width"),
        }
    }

    /// Memory operands of these sizes escape sandboxing: they are never
    /// dereferenced (`lea`) or are advisory (`prefetch`).
    pub fn is_unsandboxed_mem(self) -> bool {
        matches!(self, Size::LeaMem | Size::PrefetchMem)
    }
}

/// Operand kind after size substitution; the `kind` half of the
/// instruction-table operand language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    /// Immediate value of the operand size.
    Imm,
    /// ModR/M r/m field, register or memory.
    Rm,
    /// ModR/M reg field.
    Reg,
    /// ModR/M r/m field restricted to a register.
    Reg2,
    /// ModR/M r/m field restricted to memory.
    Mem,
    /// `lea` memory operand.
    LeaMem,
    /// Absolute moffs displacement. Rejected outright in 64-bit NaCl
    /// mode.
    Addr,
    /// Immediate used as a relative branch target.
    JumpDest,
    /// Register embedded in the low bits of the opcode byte.
    FixReg(u8),
    /// The accumulator of the operand size.
    Ax,
    /// The literal shift count `1`.
    One,
    /// The `%cl` shift count.
    Cl,
    /// The x87 stack top.
    St,
    /// String-operation destination `es:[edi]`.
    EsEdi,
    /// String-operation source `ds:[esi]`.
    DsEsi,
}

/// One operand: kind, size, and whether the instruction only reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Arg {
    /// Operand kind.
    pub kind: ArgKind,
    /// Operand size.
    pub size: Size,
    /// The instruction never writes this operand.
    pub readonly: bool,
}

impl Arg {
    /// Operand of the given kind and size, writable.
    pub fn new(kind: ArgKind, size: Size) -> Arg {
        Arg {
            kind,
            size,
            readonly: false,
        }
    }

    /// Mark the operand read-only.
    pub fn ro(mut self) -> Arg {
        self.readonly = true;
        self
    }

    /// Immediate operand.
    pub fn imm(size: Size) -> Arg {
        Arg::new(ArgKind::Imm, size)
    }

    /// ModR/M r/m operand.
    pub fn rm(size: Size) -> Arg {
        Arg::new(ArgKind::Rm, size)
    }

    /// ModR/M reg operand.
    pub fn reg(size: Size) -> Arg {
        Arg::new(ArgKind::Reg, size)
    }

    /// Register-only r/m operand.
    pub fn reg2(size: Size) -> Arg {
        Arg::new(ArgKind::Reg2, size)
    }

    /// Memory-only r/m operand.
    pub fn mem(size: Size) -> Arg {
        Arg::new(ArgKind::Mem, size)
    }

    /// Relative jump target of the given displacement size.
    pub fn jump_dest(size: Size) -> Arg {
        Arg::new(ArgKind::JumpDest, size)
    }
}

/// Per-operand-slot attributes governing register selection and label
/// emission. A plain value type; two equal attribute records are
/// interchangeable everywhere, which is all the interning of the
/// construction caches needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OperandAttrs {
    /// The slot is never written.
    pub readonly: bool,
    /// A 32-bit register chosen for this slot is zero-extended by the
    /// instruction.
    pub canzeroextend: bool,
}

/// Size-polymorphic operand shape, resolved by [`subst_size`]. This is
/// the language the operand-size dispatch helpers speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fmt {
    /// Immediate of the substituted size (capped at 32 bits under
    /// REX.W).
    Imm,
    /// 8-bit immediate regardless of operand size.
    Imm8,
    /// The one immediate allowed to be genuinely 64-bit (`movabs`).
    ImmMovabs,
    /// r/m operand.
    Rm,
    /// Read-only r/m operand.
    RmRo,
    /// reg operand.
    Reg,
    /// Read-only reg operand.
    RegRo,
    /// `lea` memory operand.
    LeaMem,
    /// Absolute moffs displacement.
    Addr,
    /// Accumulator.
    Ax,
    /// Literal `1`.
    One,
    /// `%cl`.
    Cl,
    /// Opcode-embedded register.
    FixReg {
        /// Low three bits of the register number.
        num: u8,
        /// Whether the instruction only reads the register.
        readonly: bool,
    },
}

/// Writable opcode-embedded register operand.
pub fn fixreg(num: u8) -> Fmt {
    Fmt::FixReg {
        num,
        readonly: false,
    }
}

/// Read-only opcode-embedded register operand.
pub fn fixreg_ro(num: u8) -> Fmt {
    Fmt::FixReg {
        num,
        readonly: true,
    }
}

/// Resolve a size-polymorphic operand list at a concrete operand size.
///
/// Immediates and jump targets stay 32-bit even at a 64-bit operand size;
/// only `movabs` takes a true 64-bit immediate.
pub fn subst_size(fmt: &[Fmt], size: Size) -> Vec<Arg> {
    fmt.iter()
        .map(|&item| match item {
            Fmt::Imm8 => Arg::imm(Size::B8),
            Fmt::Imm if size == Size::B64 => Arg::imm(Size::B32),
            Fmt::Imm => Arg::imm(size),
            Fmt::ImmMovabs => Arg::imm(size),
            Fmt::Rm => Arg::rm(size),
            Fmt::RmRo => Arg::rm(size).ro(),
            Fmt::Reg => Arg::reg(size),
            Fmt::RegRo => Arg::reg(size).ro(),
            Fmt::LeaMem => Arg::new(ArgKind::LeaMem, size),
            Fmt::Addr => Arg::new(ArgKind::Addr, size),
            Fmt::Ax => Arg::new(ArgKind::Ax, size),
            Fmt::One => Arg::new(ArgKind::One, size),
            Fmt::Cl => Arg::new(ArgKind::Cl, size),
            Fmt::FixReg { num, readonly } => {
                let arg = Arg::new(ArgKind::FixReg(num), size);
                if readonly {
                    arg.ro()
                } else {
                    arg
                }
            }
        })
        .collect()
}

/// Attributes of an operand slot. `canzeroextend` is true for the
/// destination slot of an instruction on the zero-extension whitelist.
pub fn attrs_of(arg: Arg, canzeroextend: bool) -> OperandAttrs {
    OperandAttrs {
        readonly: arg.readonly,
        canzeroextend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rex_w_keeps_plain_immediates_at_32_bits() {
        let args = subst_size(&[Fmt::Rm, Fmt::Imm], Size::B64);
        assert_eq!(args[0], Arg::rm(Size::B64));
        assert_eq!(args[1], Arg::imm(Size::B32));
    }

    #[test]
    fn movabs_immediates_may_be_64_bit() {
        let args = subst_size(&[fixreg(0), Fmt::ImmMovabs], Size::B64);
        assert_eq!(args[1], Arg::imm(Size::B64));
    }

    #[test]
    fn imm8_ignores_the_operand_size() {
        let args = subst_size(&[Fmt::Rm, Fmt::Imm8], Size::B16);
        assert_eq!(args[1], Arg::imm(Size::B8));
    }
}
