//! The NaCl sandbox policy: protected registers, whitelists, and the
//! enumeration modes of the instruction table.

/// Registers the sandbox never lets an instruction write directly, in
/// every width they are addressable under. `%r15` holds the sandbox
/// base; `%rsp`/`%rbp` must stay valid stack addresses.
pub const UNWRITABLE_REGS: [&str; 12] = [
    "r15", "r15d", "r15w", "r15b", "rsp", "esp", "sp", "spl", "rbp", "ebp", "bp", "bpl",
];

/// Registers allowed as the base of a sandboxed memory access.
pub const BASE_REGS: [&str; 3] = ["r15", "rsp", "rbp"];

/// Instructions which can use the `lock` prefix.
pub const LOCK_WHITELIST: [&str; 19] = [
    "adc", "add", "and", "btc", "btr", "bts", "cmpxchg", "cmpxchg8b", "cmpxchg16b", "dec",
    "inc", "neg", "not", "or", "sbb", "sub", "xadd", "xchg", "xor",
];

/// Instructions which we rely upon to zero the top 32 bits of the
/// destination register.
pub const ZEROEXTEND_WHITELIST: [&str; 15] = [
    "mov", "movd", "movsx", "movsxd", "movzx", "lea", "add", "sub", "xadd", "and", "or",
    "xor", "xchg", "neg", "not",
];

/// Whether writing the named register is forbidden.
pub fn is_unwritable(regname: &str) -> bool {
    UNWRITABLE_REGS.contains(&regname)
}

/// Whether the named register may base a sandboxed memory access.
pub fn is_base_reg(regname: &str) -> bool {
    BASE_REGS.contains(&regname)
}

/// Whether the mnemonic accepts a `lock` prefix.
pub fn is_lockable(name: &str) -> bool {
    LOCK_WHITELIST.contains(&name)
}

/// Whether the mnemonic zero-extends its 32-bit destination in a way the
/// validator may rely on.
pub fn is_zeroextending(name: &str) -> bool {
    ZEROEXTEND_WHITELIST.contains(&name)
}

/// Enumeration mode of one instruction-table pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode {
    /// Restrict encodings to those the sandbox can validate.
    pub nacl: bool,
    /// Only include encodings whose ModR/M addresses memory.
    pub mem_access_only: bool,
    /// Only include the LOCK-prefix whitelist, memory forms only.
    pub lockable_only: bool,
    /// Only include instructions allowed under a `%gs` segment override.
    /// An x86-32 carryover; never enabled by the 64-bit driver.
    pub gs_access_only: bool,
}

impl Mode {
    /// The default NaCl enumeration.
    pub fn nacl() -> Mode {
        Mode {
            nacl: true,
            ..Mode::default()
        }
    }

    /// The enumeration merged in under the `f0` lock prefix.
    pub fn nacl_lockable() -> Mode {
        Mode {
            nacl: true,
            mem_access_only: true,
            lockable_only: true,
            ..Mode::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_registers_cover_all_widths() {
        for reg in ["rsp", "esp", "sp", "spl", "rbp", "ebp", "bp", "bpl", "r15", "r15d"] {
            assert!(is_unwritable(reg), "{reg} must be protected");
        }
        for reg in ["rax", "eax", "r14", "r14d", "sil", "ah"] {
            assert!(!is_unwritable(reg), "{reg} must stay writable");
        }
    }

    #[test]
    fn lock_whitelist_excludes_plain_moves() {
        assert!(is_lockable("xadd"));
        assert!(is_lockable("cmpxchg16b"));
        assert!(!is_lockable("mov"));
        assert!(!is_lockable("test"));
    }

    #[test]
    fn imul_is_not_relied_on_for_zero_extension() {
        assert!(is_zeroextending("lea"));
        assert!(is_zeroextending("xchg"));
        assert!(!is_zeroextending("imul"));
    }
}
