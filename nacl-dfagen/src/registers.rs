//! Register and operand-size tables.

use crate::operand::Size;

/// 64-bit general-purpose registers in hardware encoding order.
pub const REGS64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// 32-bit general-purpose registers.
pub const REGS32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d",
    "r12d", "r13d", "r14d", "r15d",
];

/// 16-bit general-purpose registers.
pub const REGS16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w",
    "r13w", "r14w", "r15w",
];

/// 8-bit registers accessible with no REX prefix. These can be the low or
/// high 8 bits of a 16-bit register.
pub const REGS8_ORIGINAL: [&str; 8] = ["al", "cl", "dl", "bl", "ah", "ch", "dh", "bh"];

/// 8-bit registers accessible with a REX prefix. These are always the low
/// 8 bits of a larger register.
pub const REGS8_EXTENDED: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b",
    "r13b", "r14b", "r15b",
];

/// x87 stack registers.
pub const REGS_X87: [&str; 8] = [
    "st(0)", "st(1)", "st(2)", "st(3)", "st(4)", "st(5)", "st(6)", "st(7)",
];

/// MMX registers.
pub const REGS_MMX: [&str; 8] = ["mm0", "mm1", "mm2", "mm3", "mm4", "mm5", "mm6", "mm7"];

/// SSE registers.
pub const REGS_XMM: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10",
    "xmm11", "xmm12", "xmm13", "xmm14", "xmm15",
];

/// Condition-code suffixes in encoding order (`j<cc>`, `cmov<cc>`,
/// `set<cc>`).
pub const COND_CODES: [&str; 16] = [
    "o", "no", "b", "ae", "e", "ne", "be", "a", "s", "ns", "p", "np", "l", "ge", "le", "g",
];

/// Register table selected by operand size. 8-bit operands see different
/// registers depending on whether any REX prefix is present.
pub fn regs_by_size(has_rex: bool, size: Size) -> &'static [&'static str] {
    match size {
        Size::B8 => {
            if has_rex {
                &REGS8_EXTENDED
            } else {
                &REGS8_ORIGINAL
            }
        }
        Size::B16 => &REGS16,
        Size::B32 => &REGS32,
        Size::B64 => &REGS64,
        Size::X87 => &REGS_X87,
        Size::Mmx | Size::Mmx32 | Size::Mmx64 => &REGS_MMX,
        Size::Xmm | Size::Xmm32 | Size::Xmm64 => &REGS_XMM,
        other => panic!("no register table for operand size {other:?}"),
    }
}

/// The `SIZE PTR ` prefix objdump prints for a memory operand of the
/// given size.
pub fn mem_size_str(size: Size) -> &'static str {
    match size {
        Size::B128 => "OWORD PTR ",
        Size::B64 => "QWORD PTR ",
        Size::B32 => "DWORD PTR ",
        Size::B16 => "WORD PTR ",
        Size::B8 => "BYTE PTR ",
        Size::Mmx32 => "DWORD PTR ",
        Size::Mmx64 => "QWORD PTR ",
        Size::Xmm => "XMMWORD PTR ",
        Size::Xmm32 => "DWORD PTR ",
        Size::Xmm64 => "QWORD PTR ",
        Size::LeaMem => "",
        Size::PrefetchMem => "BYTE PTR ",
        Size::B80 => "TBYTE PTR ",
        Size::OtherX87Size => "",
        Size::FxsaveSize => "",
        // Should be XMMWORD, but objdump omits this.
        Size::LddquSize => "",
        other => panic!("no memory size string for operand size {other:?}"),
    }
}

/// Registers 0..=7 of a table paired with their names, the high encoding
/// bit supplied by a REX bit. MMX and x87 tables have no extended half,
/// so the bit selects the same eight names there.
pub fn extended_regs(
    top_bit: bool,
    regs: &'static [&'static str],
) -> impl Iterator<Item = (u8, &'static str)> {
    assert!(regs.len() == 8 || regs.len() == 16);
    let offset = if regs.len() == 16 && top_bit { 8 } else { 0 };
    (0u8..8).map(move |reg| (reg, regs[reg as usize + offset]))
}
