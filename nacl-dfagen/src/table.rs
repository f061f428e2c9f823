//! The instruction table.
//!
//! One pass of [`CoreBuilder::instructions`] describes every encoding
//! permitted after the optional legacy prefixes and REX byte, for one
//! REX combination and one enumeration mode. [`rex_root`] assembles the
//! 17 REX cases into one trie, splitting legacy prefixes so that REX
//! lands between them and the opcode; [`build_root`] merges the plain
//! enumeration with the `f0`-prefixed lockable subset.

use tracing::info;

use nacl_trie::merge::{merge, merge_many, no_merge};
use nacl_trie::{Accept, ArgSlot, Children, LabelKey, LabelValue, NodeId, Token};

use crate::modrm::{push_labels, Builder};
use crate::operand::{attrs_of, fixreg, fixreg_ro, subst_size, Arg, ArgKind, Fmt, Size};
use crate::policy::{self, Mode};
use crate::registers::{self, COND_CODES};
use crate::rex::{Rex, RexBits};

/// x87 register-form operand layouts.
#[derive(Clone, Copy)]
enum X87 {
    /// `st, st(i)`
    StReg,
    /// `st(i), st`
    RegSt,
    /// `st(i)` alone
    Reg,
}

/// Builds the (prefix bytes, subtree) pairs of one enumeration pass.
pub(crate) struct CoreBuilder<'a, 't> {
    b: &'a mut Builder<'t>,
    rex: Rex,
    mode: Mode,
    out: Vec<(Vec<u8>, NodeId)>,
}

impl<'a, 't> CoreBuilder<'a, 't> {
    fn add(&mut self, bytes: &[u8], name: &str, args: &[Arg]) {
        self.add_full(bytes, name, args, None, false);
    }

    fn add_ext(&mut self, bytes: &[u8], name: &str, args: &[Arg], modrm_opcode: u8) {
        self.add_full(bytes, name, args, Some(modrm_opcode), false);
    }

    fn add_full(
        &mut self,
        bytes: &[u8],
        name: &str,
        args: &[Arg],
        modrm_opcode: Option<u8>,
        data16: bool,
    ) {
        let mut args = args.to_vec();
        if name == "cmp" {
            // Mark all operands as read-only.
            for arg in &mut args {
                arg.readonly = true;
            }
        }
        if self.mode.lockable_only {
            if !policy::is_lockable(name) {
                return;
            }
            match args[0].kind {
                ArgKind::Rm | ArgKind::Mem => {}
                ArgKind::Reg | ArgKind::Ax | ArgKind::FixReg(_) => return,
                other => panic!("unexpected lock destination kind {other:?}"),
            }
        }
        if self.mode.nacl {
            // The following restrictions are enforced by the original
            // x86-32 NaCl validator, but might not be needed for safety.
            // %gs is allowed only with a limited set of instructions.
            if self.mode.gs_access_only && (!matches!(name, "mov" | "cmp") || data16) {
                return;
            }
            // Combining the data16 prefix with rep/repnz is not allowed.
            if data16 && matches!(bytes[0], 0xf2 | 0xf3) {
                return;
            }
            // repnz is not allowed with movs/stos, though that may just
            // be a mistake in the original validator.
            if matches!(name, "repnz movs" | "repnz stos") {
                return;
            }
            // These instructions are not allowed in their 16-bit forms.
            if data16
                && matches!(name, "xadd" | "cmpxchg" | "shld" | "shrd" | "bsf" | "bsr" | "jmp")
            {
                return;
            }
        }

        let zeroextending = policy::is_zeroextending(name);
        let mut immediate_bits = 0u32;
        let mut rm_size: Option<Size> = None;
        let mut rm_attrs = None;
        let mut rm_allow_reg = !self.mode.mem_access_only;
        let mut rm_allow_mem = true;
        let mut reg_size: Option<Size> = None;
        let mut reg_attrs = None;
        let mut out_args: Vec<ArgSlot> = Vec::new();
        let mut labels: Vec<(LabelKey, LabelValue)> = Vec::new();
        let mut mem_access = false;

        for (index, arg) in args.iter().enumerate() {
            // The first operand of a whitelisted instruction is the
            // destination it zero-extends.
            let canzeroextend = index == 0 && zeroextending;
            match arg.kind {
                ArgKind::Imm => {
                    // We can have multiple immediates (insertq).
                    immediate_bits += arg.size.bits();
                    out_args.push(ArgSlot::Lit(format!("VALUE{}", arg.size.bits())));
                }
                ArgKind::Rm => {
                    assert!(rm_size.is_none(), "two r/m operands in {name}");
                    rm_size = Some(arg.size);
                    rm_attrs = Some(attrs_of(*arg, canzeroextend));
                    out_args.push(ArgSlot::Rm);
                    mem_access = true;
                }
                ArgKind::LeaMem => {
                    assert!(rm_size.is_none(), "two r/m operands in {name}");
                    // For lea, the size is really irrelevant.
                    rm_size = Some(Size::LeaMem);
                    rm_allow_reg = false;
                    out_args.push(ArgSlot::Rm);
                }
                ArgKind::Mem => {
                    assert!(rm_size.is_none(), "two r/m operands in {name}");
                    rm_size = Some(arg.size);
                    rm_allow_reg = false;
                    out_args.push(ArgSlot::Rm);
                    mem_access = true;
                }
                ArgKind::Reg2 => {
                    // Register specified by the ModR/M r/m field: like
                    // Rm except that no memory access is allowed.
                    assert!(rm_size.is_none(), "two r/m operands in {name}");
                    rm_size = Some(arg.size);
                    rm_attrs = Some(attrs_of(*arg, canzeroextend));
                    rm_allow_mem = false;
                    out_args.push(ArgSlot::Rm);
                }
                ArgKind::Reg => {
                    assert!(reg_size.is_none(), "two reg operands in {name}");
                    reg_size = Some(arg.size);
                    reg_attrs = Some(attrs_of(*arg, canzeroextend));
                    out_args.push(ArgSlot::Reg);
                }
                ArgKind::Addr => {
                    // Absolute moffs addressing is not sandboxable in
                    // 64-bit mode.
                    return;
                }
                ArgKind::JumpDest => {
                    assert_eq!(immediate_bits, 0, "jump target after an immediate in {name}");
                    immediate_bits = arg.size.bits();
                    out_args.push(ArgSlot::Lit("JUMP_DEST".into()));
                    labels.push((
                        LabelKey::RelativeJump,
                        LabelValue::Width((arg.size.bits() / 8) as u8),
                    ));
                }
                ArgKind::Ax => {
                    let regs = registers::regs_by_size(self.rex.has_rex(), arg.size);
                    out_args.push(ArgSlot::Lit(regs[0].into()));
                }
                ArgKind::One => out_args.push(ArgSlot::Lit("1".into())),
                ArgKind::Cl => out_args.push(ArgSlot::Lit("cl".into())),
                ArgKind::St => out_args.push(ArgSlot::Lit("st".into())),
                ArgKind::FixReg(num) => {
                    let regs = registers::regs_by_size(self.rex.has_rex(), arg.size);
                    let offset = if regs.len() == 16 && self.rex.b() { 8 } else { 0 };
                    let regname = regs[num as usize + offset];
                    if !arg.readonly && policy::is_unwritable(regname) {
                        return;
                    }
                    out_args.push(ArgSlot::Lit(regname.into()));
                }
                ArgKind::EsEdi => {
                    // Accesses memory, but cannot take lock or segment
                    // prefixes, so it does not count as a memory access
                    // for the prefix-restricted modes.
                    let size = registers::mem_size_str(arg.size);
                    out_args.push(ArgSlot::Lit(format!("{size}es:[edi]")));
                }
                ArgKind::DsEsi => {
                    let size = registers::mem_size_str(arg.size);
                    out_args.push(ArgSlot::Lit(format!("{size}ds:[esi]")));
                }
            }
        }

        if self.mode.mem_access_only && !mem_access {
            return;
        }

        labels.push((LabelKey::Args, LabelValue::Args(out_args)));
        labels.push((LabelKey::InstrName, LabelValue::Text(name.into())));

        let imm = self.b.immediate_node(immediate_bits);
        let node = match (rm_size, reg_size) {
            (Some(rm_size), Some(reg_size)) => {
                assert!(
                    modrm_opcode.is_none(),
                    "opcode extension with a reg operand in {name}"
                );
                let mut node = self.b.modrm_node(
                    self.rex.has_rex(),
                    self.rex.r(),
                    self.rex.x(),
                    self.rex.b(),
                    reg_size,
                    reg_attrs.unwrap(),
                    rm_size,
                    rm_attrs,
                    rm_allow_reg,
                    rm_allow_mem,
                    imm,
                );
                if !(rm_allow_reg && rm_allow_mem) {
                    // Instructions sharing an opcode split on the ModR/M
                    // byte; their labels must follow it.
                    node = push_labels(self.b.trie, &labels, node);
                    labels.clear();
                }
                node
            }
            (Some(rm_size), None) => {
                let opcode = modrm_opcode
                    .unwrap_or_else(|| panic!("lone r/m operand without opcode extension in {name}"));
                let node = self.b.modrm_single_arg(
                    self.rex.has_rex(),
                    self.rex.x(),
                    self.rex.b(),
                    rm_size,
                    rm_attrs,
                    rm_allow_reg,
                    rm_allow_mem,
                    opcode,
                    imm,
                );
                let node = push_labels(self.b.trie, &labels, node);
                labels.clear();
                node
            }
            (None, None) => {
                assert!(
                    modrm_opcode.is_none(),
                    "opcode extension without an r/m operand in {name}"
                );
                imm
            }
            (None, Some(_)) => panic!("reg operand without an r/m operand in {name}"),
        };

        let mut bytes = bytes.to_vec();
        if data16 {
            bytes.insert(0, 0x66);
        }
        let labeled = self.b.trie.labels(&labels, node);
        self.out.push((bytes, labeled));
    }

    fn rex_size(&self, size: Size) -> Size {
        if self.rex.w() {
            Size::B64
        } else {
            size
        }
    }

    /// data16 and 32-bit (64-bit under REX.W) operand-size variants.
    fn add_lw(&mut self, opcode: u8, name: &str, fmt: &[Fmt]) {
        self.add_lw2(&[opcode], name, fmt);
    }

    fn add_lw_ext(&mut self, opcode: u8, name: &str, fmt: &[Fmt], ext: u8) {
        self.add_lw2_ext(&[opcode], name, fmt, ext);
    }

    fn add_lw2(&mut self, bytes: &[u8], name: &str, fmt: &[Fmt]) {
        let b16 = subst_size(fmt, self.rex_size(Size::B16));
        self.add_full(bytes, name, &b16, None, true);
        let b32 = subst_size(fmt, self.rex_size(Size::B32));
        self.add_full(bytes, name, &b32, None, false);
    }

    fn add_lw2_ext(&mut self, bytes: &[u8], name: &str, fmt: &[Fmt], ext: u8) {
        let b16 = subst_size(fmt, self.rex_size(Size::B16));
        self.add_full(bytes, name, &b16, Some(ext), true);
        let b32 = subst_size(fmt, self.rex_size(Size::B32));
        self.add_full(bytes, name, &b32, Some(ext), false);
    }

    /// Like [`CoreBuilder::add_lw`], but push and pop never use a 32-bit
    /// operand: the non-data16 form is 64-bit even without REX.W.
    fn add_lw_push_pop(&mut self, opcode: u8, name: &str, fmt: &[Fmt]) {
        let b16 = subst_size(fmt, self.rex_size(Size::B16));
        self.add_full(&[opcode], name, &b16, None, true);
        let b64 = subst_size(fmt, Size::B64);
        self.add_full(&[opcode], name, &b64, None, false);
    }

    fn add_lw_push_pop_ext(&mut self, opcode: u8, name: &str, fmt: &[Fmt], ext: u8) {
        let b16 = subst_size(fmt, self.rex_size(Size::B16));
        self.add_full(&[opcode], name, &b16, Some(ext), true);
        let b64 = subst_size(fmt, Size::B64);
        self.add_full(&[opcode], name, &b64, Some(ext), false);
    }

    /// An 8-bit variant at `opcode` and the LW pair at `opcode + 1`.
    fn add_pair(&mut self, opcode: u8, name: &str, fmt: &[Fmt]) {
        let b8 = subst_size(fmt, Size::B8);
        self.add(&[opcode], name, &b8);
        self.add_lw(opcode + 1, name, fmt);
    }

    fn add_pair_ext(&mut self, opcode: u8, name: &str, fmt: &[Fmt], ext: u8) {
        let b8 = subst_size(fmt, Size::B8);
        self.add_ext(&[opcode], name, &b8, ext);
        self.add_lw_ext(opcode + 1, name, fmt, ext);
    }

    /// Like [`CoreBuilder::add_pair`], under an opcode-map prefix.
    fn add_pair2(&mut self, prefix: u8, opcode: u8, name: &str, fmt: &[Fmt]) {
        let b8 = subst_size(fmt, Size::B8);
        self.add(&[prefix, opcode], name, &b8);
        self.add_lw2(&[prefix, opcode + 1], name, fmt);
    }

    /// Resolve one AMD-manual operand code at the current REX state.
    fn form_arg(&self, code: &str) -> Arg {
        let dq = if self.rex.w() { Size::B64 } else { Size::B32 };
        match code {
            "Ib" => Arg::imm(Size::B8),
            "Gd" => Arg::reg(Size::B32),
            "Gq" => Arg::reg(Size::B64),
            "Gd/q" => Arg::reg(dq),
            "Ed" => Arg::rm(Size::B32),
            "Eq" => Arg::rm(Size::B64),
            "Ed/q" => Arg::rm(dq),
            "Md" => Arg::mem(Size::B32),
            "Mq" => Arg::mem(Size::B64),
            "Mdq" => Arg::mem(Size::Xmm),
            "Pd" | "Pq" => Arg::reg(Size::Mmx),
            "Vd" => Arg::reg(Size::Xmm32),
            "Nq" => Arg::reg2(Size::Mmx),
            "Qd" => Arg::rm(Size::Mmx32),
            "Qq" => Arg::rm(Size::Mmx64),
            other => {
                let kind = match &other[..1] {
                    "R" | "U" => ArgKind::Reg2,
                    "V" => ArgKind::Reg,
                    "W" => ArgKind::Rm,
                    prefix => panic!("unknown operand position code {prefix:?} in {other:?}"),
                };
                let size = match &other[1..] {
                    "dq" | "pd" | "ps" => Size::Xmm,
                    "sd" | "q" => Size::Xmm64,
                    "ss" => Size::Xmm32,
                    suffix => panic!("unknown operand size code {suffix:?} in {other:?}"),
                };
                Arg::new(kind, size)
            }
        }
    }

    /// Add an instruction from its AMD-manual operand letter codes.
    fn add_form(&mut self, bytes: &[u8], name: &str, form: &str) {
        let args: Vec<Arg> = form.split_whitespace().map(|code| self.form_arg(code)).collect();
        self.add(bytes, name, &args);
    }

    fn add_form_ext(&mut self, bytes: &[u8], name: &str, form: &str, ext: u8) {
        let args: Vec<Arg> = form.split_whitespace().map(|code| self.form_arg(code)).collect();
        self.add_ext(bytes, name, &args, ext);
    }

    /// MMX form and its `66`-prefixed SSE counterpart.
    fn add_sse_mmx_pair(&mut self, opcode: u8, name: &str) {
        self.add_form(&[0x0f, opcode], name, "Pq Qq");
        self.add_form(&[0x66, 0x0f, opcode], name, "Vdq Wdq");
    }

    fn add_fp_mem(&mut self, opcode: u8, name: &str, ext: u8, size: Size) {
        self.add_ext(&[opcode], name, &[Arg::mem(size)], ext);
    }

    fn add_fp_reg(&mut self, opcode: u8, name: &str, ext: u8, fmt: X87) {
        let st = Arg::new(ArgKind::St, Size::X87);
        let reg = Arg::reg2(Size::X87);
        let args: Vec<Arg> = match fmt {
            X87::StReg => vec![st, reg],
            X87::RegSt => vec![reg, st],
            X87::Reg => vec![reg],
        };
        self.add_ext(&[opcode], name, &args, ext);
    }

    fn add_fp_rm(&mut self, opcode: u8, name: &str, ext: u8, fmt: X87, size: Size) {
        self.add_fp_mem(opcode, name, ext, size);
        self.add_fp_reg(opcode, name, ext, fmt);
    }

    /// AMD 3DNow! instructions are special: the 3DNow! opcode is placed
    /// at the end of the instruction, where immediates normally live.
    fn add_3dnow(&mut self, instrs: &[(u8, &str)]) {
        if self.mode.lockable_only {
            return;
        }
        if self.mode.nacl && self.mode.gs_access_only {
            return;
        }
        let mut children = Children::new();
        for &(imm_opcode, name) in instrs {
            let tail = self.b.trie.accept_node();
            let labeled = self
                .b
                .trie
                .label(LabelKey::InstrName, LabelValue::Text(name.into()), tail);
            children.insert(Token::Byte(imm_opcode), labeled);
        }
        let secondary = self.b.trie.branch(children, Accept::No);
        let node = self.b.modrm_node(
            self.rex.has_rex(),
            self.rex.r(),
            self.rex.x(),
            self.rex.b(),
            Size::Mmx,
            Default::default(),
            Size::Mmx64,
            Some(Default::default()),
            !self.mode.mem_access_only,
            true,
            secondary,
        );
        let labeled = self.b.trie.label(
            LabelKey::Args,
            LabelValue::Args(vec![ArgSlot::Reg, ArgSlot::Rm]),
            node,
        );
        self.out.push((vec![0x0f, 0x0f], labeled));
    }

    /// The whole table for one REX combination and mode.
    fn instructions(&mut self) {
        use Fmt::{Ax, Cl, Imm, Imm8, ImmMovabs, LeaMem, One, Reg, RegRo, Rm, RmRo};

        // Arithmetic instructions.
        for (arith_opcode, name) in ["add", "or", "adc", "sbb", "and", "sub", "xor", "cmp"]
            .into_iter()
            .enumerate()
        {
            let arith_opcode = arith_opcode as u8;
            for (format_num, fmt) in
                [&[Rm, Reg][..], &[Reg, Rm][..], &[Ax, Imm][..]].into_iter().enumerate()
            {
                let opcode = (arith_opcode << 3) | ((format_num as u8) << 1);
                self.add_pair(opcode, name, fmt);
            }
            // Group 1. 0x82 is a hole in the table: an 0x82 pair would
            // duplicate 0x80 (both 8-bit ops with imm8).
            self.add_pair_ext(0x80, name, &[Rm, Imm], arith_opcode);
            self.add_lw_ext(0x83, name, &[Rm, Imm8], arith_opcode);
        }

        // Group 2: shift instructions. 6 is absent.
        for (name, ext) in [
            ("rol", 0),
            ("ror", 1),
            ("rcl", 2),
            ("rcr", 3),
            ("shl", 4),
            ("shr", 5),
            ("sar", 7),
        ] {
            self.add_pair_ext(0xc0, name, &[Rm, Imm8], ext);
            self.add_pair_ext(0xd0, name, &[Rm, One], ext);
            self.add_pair_ext(0xd2, name, &[Rm, Cl], ext);
        }

        // 0x40..0x4f carry inc/dec on x86-32; they are the REX prefixes
        // here.
        for reg_num in 0..8 {
            self.add_lw_push_pop(0x50 + reg_num, "push", &[fixreg_ro(reg_num)]);
            self.add_lw_push_pop(0x58 + reg_num, "pop", &[fixreg(reg_num)]);
        }

        // These push instructions all move %rsp by 8 bytes. The 16-bit
        // "66 68" form is omitted: old binutils disassembles it with a
        // bogus 32-bit immediate.
        self.add(&[0x68], "push", &[Arg::imm(Size::B32)]);
        self.add(&[0x6a], "push", &[Arg::imm(Size::B8)]);

        self.add_lw(0x69, "imul", &[Reg, Rm, Imm]);
        self.add_lw(0x6b, "imul", &[Reg, Rm, Imm8]);

        // Short (8-bit offset) conditional jumps.
        for (cond_num, cond_name) in COND_CODES.iter().enumerate() {
            self.add(
                &[0x70 + cond_num as u8],
                &format!("j{cond_name}"),
                &[Arg::jump_dest(Size::B8)],
            );
        }

        self.add_pair(0x84, "test", &[Rm, Reg]);
        self.add_pair(0x86, "xchg", &[Rm, Reg]);
        self.add_lw(0x8d, "lea", &[Reg, LeaMem]);
        // Group 1a just contains pop.
        self.add_lw_push_pop_ext(0x8f, "pop", &[Rm], 0);

        if !self.rex.has_rex() {
            // nop is really xchg %eax, %eax.
            self.add(&[0x90], "nop", &[]);
            // This might also be called data16 nop.
            self.add(&[0x66, 0x90], "xchg ax, ax", &[]);
            // pause is really rep nop.
            self.add(&[0xf3, 0x90], "pause", &[]);
        }
        for reg_num in 1..8 {
            self.add_lw(0x90 + reg_num, "xchg", &[fixreg(reg_num), Ax]);
        }

        if self.rex.w() {
            // Convert long to quad: sign-extends %eax into %rax.
            self.add(&[0x98], "cdqe", &[]);
            // Convert quad to double quad: fills %rdx with the top bit
            // of %rax.
            self.add(&[0x99], "cqo", &[]);
        } else {
            self.add(&[0x98], "cwde", &[]);
            self.add(&[0x66, 0x98], "cbw", &[]);
            self.add(&[0x99], "cdq", &[]);
            self.add(&[0x66, 0x99], "cwd", &[]);
        }
        // Assemblers treat fwait as a prefix such that "fwait; fnXXX"
        // is shorthand for "fXXX"; it is an instruction in its own
        // right.
        if !self.rex.has_rex() {
            self.add(&[0x9b], "fwait", &[]);
        }
        // sahf and lahf are not allowed on x86-64.
        self.add(&[0xf4], "hlt", &[]);

        if !self.mode.nacl {
            self.add(&[0x9c], "pushf", &[]);
            self.add(&[0x9d], "popf", &[]);
            self.add(&[0xc2], "ret", &[Arg::imm(Size::B16)]);
            self.add(&[0xc3], "ret", &[]);
            self.add(&[0xcc], "int3", &[]);
            self.add(&[0xcd], "int", &[Arg::imm(Size::B8)]);
            self.add(&[0xcf], "iret", &[]);
            self.add(&[0xfa], "cli", &[]);
            self.add(&[0xfb], "sti", &[]);
        }

        // leave is disallowed: it modifies the top 32 bits of %rbp.

        self.add(&[0xe8], "call", &[Arg::jump_dest(Size::B32)]);

        self.add_pair(0xa8, "test", &[Ax, Imm]);

        if !self.mode.nacl {
            self.add(&[0xe0], "loopne", &[Arg::jump_dest(Size::B8)]);
            self.add(&[0xe1], "loope", &[Arg::jump_dest(Size::B8)]);
            self.add(&[0xe2], "loop", &[Arg::jump_dest(Size::B8)]);
            if !self.rex.has_rex() {
                self.add(&[0xe3], "jrcxz", &[Arg::jump_dest(Size::B8)]);
                self.add(&[0x67, 0xe3], "jecxz", &[Arg::jump_dest(Size::B8)]);
            }
        }
        self.add(&[0xe9], "jmp", &[Arg::jump_dest(Size::B32)]);
        self.add(&[0xeb], "jmp", &[Arg::jump_dest(Size::B8)]);

        self.add(&[0xf5], "cmc", &[]); // Complement carry flag
        self.add(&[0xf8], "clc", &[]); // Clear carry flag
        self.add(&[0xf9], "stc", &[]); // Set carry flag
        self.add(&[0xfc], "cld", &[]); // Clear direction flag
        self.add(&[0xfd], "std", &[]); // Set direction flag

        // Group 3.
        self.add_pair_ext(0xf6, "test", &[Rm, Imm], 0);
        for (name, ext) in [
            ("not", 2),
            ("neg", 3),
            ("mul", 4),
            ("imul", 5),
            ("div", 6),
            ("idiv", 7),
        ] {
            self.add_pair_ext(0xf6, name, &[Rm], ext);
        }

        // Groups 4 and 5.
        self.add_pair_ext(0xfe, "inc", &[Rm], 0);
        self.add_pair_ext(0xfe, "dec", &[Rm], 1);
        self.add_lw_push_pop_ext(0xff, "push", &[Rm], 6);
        // NaCl disallows indirect jumps without a mask instruction
        // first; they only enter through superinstructions.
        if !self.mode.nacl {
            self.add_ext(&[0xff], "call", &[Arg::rm(Size::B64)], 2);
            self.add_ext(&[0xff], "jmp", &[Arg::rm(Size::B64)], 4);
        }

        self.add_pair(0x88, "mov", &[Rm, RegRo]);
        self.add_pair(0x8a, "mov", &[Reg, Rm]);
        self.add_pair_ext(0xc6, "mov", &[Rm, Imm], 0); // Group 11
        self.add_pair(0xa0, "mov", &[Ax, Fmt::Addr]);
        self.add_pair(0xa2, "mov", &[Fmt::Addr, Ax]);
        for reg_num in 0..8 {
            self.add(
                &[0xb0 + reg_num],
                "mov",
                &[Arg::new(ArgKind::FixReg(reg_num), Size::B8), Arg::imm(Size::B8)],
            );
            self.add_lw(0xb8 + reg_num, "mov", &[fixreg(reg_num), ImmMovabs]);
        }

        // Two-byte opcodes.

        if !self.mode.nacl {
            self.add(&[0x0f, 0x05], "syscall", &[]);
            self.add(&[0x0f, 0x06], "clts", &[]);
            self.add(&[0x0f, 0x07], "sysret", &[]);
            self.add(&[0x0f, 0x08], "invd", &[]);
            self.add(&[0x0f, 0x09], "wbinvd", &[]);
            self.add(&[0x0f, 0x0b], "ud2", &[]);
            self.add(&[0x0f, 0x01, 0xd8], "vmrun", &[]);
            self.add(&[0x0f, 0x01, 0xd9], "vmmcall", &[]);
            self.add(&[0x0f, 0x01, 0xda], "vmload", &[]);
            self.add(&[0x0f, 0x01, 0xdb], "vmsave", &[]);
            self.add(&[0x0f, 0x01, 0xdc], "stgi", &[]);
            self.add(&[0x0f, 0x01, 0xdd], "clgi", &[]);
            self.add(&[0x0f, 0x01, 0xde], "skinit", &[]);
            self.add(&[0x0f, 0x01, 0xdf], "invlpga", &[]);
            self.add(&[0x0f, 0x01, 0xf9], "rdtscp", &[]);
        }
        self.add(&[0x0f, 0x0e], "femms", &[]);
        // Group P: prefetches.
        self.add_ext(&[0x0f, 0x0d], "prefetch", &[Arg::mem(Size::PrefetchMem)], 0);
        self.add_ext(&[0x0f, 0x0d], "prefetchw", &[Arg::mem(Size::PrefetchMem)], 1);

        self.add(&[0x0f, 0x10], "movups", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x0f, 0x11], "movups", &[Arg::rm(Size::Xmm), Arg::reg(Size::Xmm)]);
        self.add(&[0x0f, 0x12], "movlps", &[Arg::reg(Size::Xmm), Arg::mem(Size::B64)]);
        self.add(&[0x0f, 0x12], "movhlps", &[Arg::reg(Size::Xmm), Arg::reg2(Size::Xmm)]);
        self.add(&[0x0f, 0x13], "movlps", &[Arg::mem(Size::B64), Arg::reg(Size::Xmm)]);
        self.add(&[0x0f, 0x14], "unpcklps", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x0f, 0x15], "unpckhps", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x0f, 0x16], "movhps", &[Arg::reg(Size::Xmm), Arg::mem(Size::B64)]);
        self.add(&[0x0f, 0x16], "movlhps", &[Arg::reg(Size::Xmm), Arg::reg2(Size::Xmm)]);
        self.add(&[0x0f, 0x17], "movhps", &[Arg::mem(Size::B64), Arg::reg(Size::Xmm)]);
        // Group 16.
        self.add_ext(&[0x0f, 0x18], "prefetchnta", &[Arg::mem(Size::PrefetchMem)], 0);
        self.add_ext(&[0x0f, 0x18], "prefetcht0", &[Arg::mem(Size::PrefetchMem)], 1);
        self.add_ext(&[0x0f, 0x18], "prefetcht1", &[Arg::mem(Size::PrefetchMem)], 2);
        self.add_ext(&[0x0f, 0x18], "prefetcht2", &[Arg::mem(Size::PrefetchMem)], 3);

        self.add(&[0xf3, 0x0f, 0x10], "movss", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm32)]);
        self.add(&[0xf3, 0x0f, 0x11], "movss", &[Arg::rm(Size::Xmm32), Arg::reg(Size::Xmm)]);
        self.add(&[0xf3, 0x0f, 0x12], "movsldup", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0xf3, 0x0f, 0x16], "movshdup", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);

        self.add(&[0x66, 0x0f, 0x10], "movupd", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x66, 0x0f, 0x11], "movupd", &[Arg::rm(Size::Xmm), Arg::reg(Size::Xmm)]);
        self.add(&[0x66, 0x0f, 0x12], "movlpd", &[Arg::reg(Size::Xmm), Arg::mem(Size::B64)]);
        self.add(&[0x66, 0x0f, 0x13], "movlpd", &[Arg::mem(Size::B64), Arg::reg(Size::Xmm)]);
        self.add(&[0x66, 0x0f, 0x14], "unpcklpd", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x66, 0x0f, 0x15], "unpckhpd", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm)]);
        self.add(&[0x66, 0x0f, 0x16], "movhpd", &[Arg::reg(Size::Xmm), Arg::mem(Size::B64)]);
        self.add(&[0x66, 0x0f, 0x17], "movhpd", &[Arg::mem(Size::B64), Arg::reg(Size::Xmm)]);

        self.add(&[0xf2, 0x0f, 0x10], "movsd", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm64)]);
        self.add(&[0xf2, 0x0f, 0x11], "movsd", &[Arg::rm(Size::Xmm64), Arg::reg(Size::Xmm)]);
        self.add(&[0xf2, 0x0f, 0x12], "movddup", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm64)]);

        // Skip 0f 2x mov on control registers.
        self.add_form(&[0x0f, 0x28], "movaps", "Vps Wps");
        self.add_form(&[0x0f, 0x29], "movaps", "Wps Vps");
        self.add_form(&[0x66, 0x0f, 0x28], "movapd", "Vpd Wpd");
        self.add_form(&[0x66, 0x0f, 0x29], "movapd", "Wpd Vpd");
        self.add_form(&[0x0f, 0x2a], "cvtpi2ps", "Vps Qq");
        self.add_form(&[0xf3, 0x0f, 0x2a], "cvtsi2ss", "Vss Ed/q");
        self.add_form(&[0x66, 0x0f, 0x2a], "cvtpi2pd", "Vpd Qq");
        self.add_form(&[0xf2, 0x0f, 0x2a], "cvtsi2sd", "Vsd Ed/q");
        self.add_form(&[0x0f, 0x2b], "movntps", "Mdq Vps");
        self.add_form(&[0xf3, 0x0f, 0x2b], "movntss", "Md Vss");
        self.add_form(&[0x66, 0x0f, 0x2b], "movntpd", "Mdq Vpd");
        self.add_form(&[0xf2, 0x0f, 0x2b], "movntsd", "Mq Vsd");
        // The AMD manual has Pq Wps for cvttps2pi, but W is wrong (it
        // should be an MMX register) and ps is wrong (the memory
        // operand is 64-bit). binutils' assembler additionally only
        // accepts the wrong XMMWORD spelling.
        self.add(
            &[0x0f, 0x2c],
            "FIXME cvttps2pi",
            &[Arg::reg(Size::Mmx), Arg::rm(Size::Xmm64)],
        );
        self.add_form(&[0xf3, 0x0f, 0x2c], "cvttss2si", "Gd/q Wss");
        self.add_form(&[0x66, 0x0f, 0x2c], "cvttpd2pi", "Pq Wpd");
        self.add_form(&[0xf2, 0x0f, 0x2c], "cvttsd2si", "Gd/q Wsd");
        self.add(&[0x0f, 0x2d], "cvtps2pi", &[Arg::reg(Size::Mmx), Arg::rm(Size::Xmm64)]);
        self.add_form(&[0xf3, 0x0f, 0x2d], "cvtss2si", "Gd/q Wss");
        self.add_form(&[0x66, 0x0f, 0x2d], "cvtpd2pi", "Pq Wpd");
        self.add_form(&[0xf2, 0x0f, 0x2d], "cvtsd2si", "Gd/q Wsd");
        self.add_form(&[0x0f, 0x2e], "ucomiss", "Vss Wss");
        self.add_form(&[0x66, 0x0f, 0x2e], "ucomisd", "Vsd Wsd");
        // The AMD manual uses Vps Wps, but this reads a 32-bit memory
        // location.
        self.add(&[0x0f, 0x2f], "comiss", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm32)]);
        self.add_form(&[0x66, 0x0f, 0x2f], "comisd", "Vpd Wsd");

        self.add(&[0x0f, 0x31], "rdtsc", &[]);
        if !self.mode.nacl {
            self.add(&[0x0f, 0x30], "wrmsr", &[]);
            self.add(&[0x0f, 0x32], "rdmsr", &[]);
            self.add(&[0x0f, 0x33], "rdpmc", &[]);
            self.add(&[0x0f, 0x34], "sysenter", &[]);
            self.add(&[0x0f, 0x35], "sysexit", &[]);
        }

        self.add_form(&[0x0f, 0x51], "sqrtps", "Vps Wps");
        self.add_form(&[0x0f, 0x52], "rsqrtps", "Vps Rps");
        self.add_form(&[0x0f, 0x53], "rcpps", "Vps Wps");
        self.add_form(&[0x0f, 0x54], "andps", "Vps Wps");
        self.add_form(&[0x0f, 0x55], "andnps", "Vps Wps");
        self.add_form(&[0x0f, 0x56], "orps", "Vps Wps");
        self.add_form(&[0x0f, 0x57], "xorps", "Vps Wps");
        self.add_form(&[0xf3, 0x0f, 0x51], "sqrtss", "Vss Wss");
        self.add_form(&[0xf3, 0x0f, 0x52], "rsqrtss", "Vss Wss");
        self.add_form(&[0xf3, 0x0f, 0x53], "rcpss", "Vss Wss");
        self.add_form(&[0x66, 0x0f, 0x51], "sqrtpd", "Vpd Wpd");
        self.add_form(&[0x66, 0x0f, 0x54], "andpd", "Vpd Wpd");
        self.add_form(&[0x66, 0x0f, 0x55], "andnpd", "Vpd Wpd");
        self.add_form(&[0x66, 0x0f, 0x56], "orpd", "Vpd Wpd");
        self.add_form(&[0x66, 0x0f, 0x57], "xorpd", "Vpd Wpd");
        self.add_form(&[0xf2, 0x0f, 0x51], "sqrtsd", "Vsd Wsd");

        for (opcode, name) in [
            (0x58, "add"),
            (0x59, "mul"),
            (0x5c, "sub"),
            (0x5d, "min"),
            (0x5e, "div"),
            (0x5f, "max"),
        ] {
            self.add_form(&[0x0f, opcode], &format!("{name}ps"), "Vps Wps");
            self.add_form(&[0xf3, 0x0f, opcode], &format!("{name}ss"), "Vss Wss");
            self.add_form(&[0x66, 0x0f, opcode], &format!("{name}pd"), "Vpd Wpd");
            self.add_form(&[0xf2, 0x0f, opcode], &format!("{name}sd"), "Vsd Wsd");
        }
        // The AMD manual has Vpd Wps, but the operand is 64-bit.
        self.add(&[0x0f, 0x5a], "cvtps2pd", &[Arg::reg(Size::Xmm), Arg::rm(Size::Xmm64)]);
        self.add_form(&[0xf3, 0x0f, 0x5a], "cvtss2sd", "Vsd Wss");
        self.add_form(&[0x66, 0x0f, 0x5a], "cvtpd2ps", "Vps Wpd");
        self.add_form(&[0xf2, 0x0f, 0x5a], "cvtsd2ss", "Vss Wsd");
        self.add_form(&[0x0f, 0x5b], "cvtdq2ps", "Vps Wdq");
        self.add_form(&[0xf3, 0x0f, 0x5b], "cvttps2dq", "Vdq Wps");
        self.add_form(&[0x66, 0x0f, 0x5b], "cvtps2dq", "Vdq Wps");
        // f2 0f 5b is invalid.

        // MMX.
        self.add_form(&[0x0f, 0x60], "punpcklbw", "Pq Qd");
        self.add_form(&[0x0f, 0x61], "punpcklwd", "Pq Qd");
        self.add_form(&[0x0f, 0x62], "punpckldq", "Pq Qd");
        self.add_form(&[0x0f, 0x63], "packsswb", "Pq Qq");
        self.add_form(&[0x0f, 0x64], "pcmpgtb", "Pq Qq");
        self.add_form(&[0x0f, 0x65], "pcmpgtw", "Pq Qq");
        self.add_form(&[0x0f, 0x66], "pcmpgtd", "Pq Qq");
        self.add_form(&[0x0f, 0x67], "packuswb", "Pq Qq");

        // SSE. The AMD manual says Wq rather than Wdq for the low
        // punpck group, but it seems to be wrong.
        self.add_form(&[0x66, 0x0f, 0x60], "punpcklbw", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x61], "punpcklwd", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x62], "punpckldq", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x63], "packsswb", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x64], "pcmpgtb", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x65], "pcmpgtw", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x66], "pcmpgtd", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x67], "packuswb", "Vdq Wdq");

        self.add_sse_mmx_pair(0x68, "punpckhbw");
        self.add_sse_mmx_pair(0x69, "punpckhwd");
        self.add_sse_mmx_pair(0x6a, "punpckhdq");
        self.add_sse_mmx_pair(0x6b, "packssdw");
        self.add_form(&[0x66, 0x0f, 0x6c], "punpcklqdq", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x6d], "punpckhqdq", "Vdq Wdq");
        if self.rex.w() {
            self.add_form(&[0x0f, 0x6e], "movq", "Pq Eq");
            self.add_form(&[0x66, 0x0f, 0x6e], "movq", "Vdq Eq");
        } else {
            self.add_form(&[0x0f, 0x6e], "movd", "Pq Ed");
            self.add_form(&[0x66, 0x0f, 0x6e], "movd", "Vdq Ed");
        }
        self.add_form(&[0x0f, 0x6f], "movq", "Pq Qq");
        self.add_form(&[0xf3, 0x0f, 0x6f], "movdqu", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x6f], "movdqa", "Vdq Wdq");

        // The AMD manual says Wq rather than Wdq for pshufhw and
        // pshuflw, but it seems to be wrong.
        self.add_form(&[0x0f, 0x70], "pshufw", "Pq Qq Ib");
        self.add_form(&[0xf3, 0x0f, 0x70], "pshufhw", "Vq Wdq Ib");
        self.add_form(&[0x66, 0x0f, 0x70], "pshufd", "Vdq Wdq Ib");
        self.add_form(&[0xf2, 0x0f, 0x70], "pshuflw", "Vq Wdq Ib");
        self.add_form(&[0x0f, 0x74], "pcmpeqb", "Pq Qq");
        self.add_form(&[0x0f, 0x75], "pcmpeqw", "Pq Qq");
        self.add_form(&[0x0f, 0x76], "pcmpeqd", "Pq Qq");
        self.add_form(&[0x0f, 0x77], "emms", "");
        self.add_form(&[0x66, 0x0f, 0x74], "pcmpeqb", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x75], "pcmpeqw", "Vdq Wdq");
        self.add_form(&[0x66, 0x0f, 0x76], "pcmpeqd", "Vdq Wdq");
        self.add_form(&[0xf2, 0x0f, 0x78], "insertq", "Vdq Uq Ib Ib");
        self.add_form(&[0x66, 0x0f, 0x79], "extrq", "Vdq Uq");
        self.add_form(&[0xf2, 0x0f, 0x79], "insertq", "Vdq Udq");
        self.add_form(&[0x66, 0x0f, 0x7c], "haddpd", "Vpd Wpd");
        self.add_form(&[0xf2, 0x0f, 0x7c], "haddps", "Vps Wps");
        self.add_form(&[0x66, 0x0f, 0x7d], "hsubpd", "Vpd Wpd");
        self.add_form(&[0xf2, 0x0f, 0x7d], "hsubps", "Vps Wps");
        self.add_form(&[0xf3, 0x0f, 0x7e], "movq", "Vq Wq");
        if self.rex.w() {
            self.add_form(&[0x0f, 0x7e], "movq", "Eq Pq");
            self.add_form(&[0x66, 0x0f, 0x7e], "movq", "Eq Vq");
        } else {
            self.add_form(&[0x0f, 0x7e], "movd", "Ed Pd");
            self.add_form(&[0x66, 0x0f, 0x7e], "movd", "Ed Vd");
        }
        self.add_form(&[0x0f, 0x7f], "movq", "Qq Pq");
        self.add_form(&[0xf3, 0x0f, 0x7f], "movdqu", "Wdq Vdq");
        self.add_form(&[0x66, 0x0f, 0x7f], "movdqa", "Wdq Vdq");
        // Group 12.
        self.add_form_ext(&[0x0f, 0x71], "psrlw", "Nq Ib", 2);
        self.add_form_ext(&[0x0f, 0x71], "psraw", "Nq Ib", 4);
        self.add_form_ext(&[0x0f, 0x71], "psllw", "Nq Ib", 6);
        self.add_form_ext(&[0x66, 0x0f, 0x71], "psrlw", "Udq Ib", 2);
        self.add_form_ext(&[0x66, 0x0f, 0x71], "psraw", "Udq Ib", 4);
        self.add_form_ext(&[0x66, 0x0f, 0x71], "psllw", "Udq Ib", 6);
        // Group 13.
        self.add_form_ext(&[0x0f, 0x72], "psrld", "Nq Ib", 2);
        self.add_form_ext(&[0x0f, 0x72], "psrad", "Nq Ib", 4);
        self.add_form_ext(&[0x0f, 0x72], "pslld", "Nq Ib", 6);
        self.add_form_ext(&[0x66, 0x0f, 0x72], "psrld", "Udq Ib", 2);
        self.add_form_ext(&[0x66, 0x0f, 0x72], "psrad", "Udq Ib", 4);
        self.add_form_ext(&[0x66, 0x0f, 0x72], "pslld", "Udq Ib", 6);
        // Group 14.
        self.add_form_ext(&[0x0f, 0x73], "psrlq", "Nq Ib", 2);
        self.add_form_ext(&[0x0f, 0x73], "psllq", "Nq Ib", 6);
        self.add_form_ext(&[0x66, 0x0f, 0x73], "psrlq", "Udq Ib", 2);
        self.add_form_ext(&[0x66, 0x0f, 0x73], "psrldq", "Udq Ib", 3);
        self.add_form_ext(&[0x66, 0x0f, 0x73], "psllq", "Udq Ib", 6);
        self.add_form_ext(&[0x66, 0x0f, 0x73], "pslldq", "Udq Ib", 7);
        // Group 17: this extrq form is disallowed; the AMD manual says
        // Vdq but it should be Udq.
        if !self.mode.nacl {
            self.add_form_ext(&[0x66, 0x0f, 0x78], "extrq", "Udq Ib Ib", 0);
        }

        for (cond_num, cond_name) in COND_CODES.iter().enumerate() {
            let cond_num = cond_num as u8;
            // Conditional move. Added in P6.
            self.add_lw2(&[0x0f, 0x40 + cond_num], &format!("cmov{cond_name}"), &[Reg, RmRo]);
            // 4-byte offset jumps.
            self.add(
                &[0x0f, 0x80 + cond_num],
                &format!("j{cond_name}"),
                &[Arg::jump_dest(Size::B32)],
            );
            // Byte set on condition.
            self.add_ext(
                &[0x0f, 0x90 + cond_num],
                &format!("set{cond_name}"),
                &[Arg::rm(Size::B8)],
                0,
            );
        }

        self.add(&[0x0f, 0xa2], "cpuid", &[]);
        if !self.mode.nacl {
            // Bit test/set/clear operations.
            self.add_lw2(&[0x0f, 0xa3], "bt", &[Rm, Reg]);
            self.add_lw2(&[0x0f, 0xab], "bts", &[Rm, Reg]);
            self.add_lw2(&[0x0f, 0xb3], "btr", &[Rm, Reg]);
            self.add_lw2(&[0x0f, 0xbb], "btc", &[Rm, Reg]);
            // Group 8.
            self.add_lw2_ext(&[0x0f, 0xba], "bt", &[Rm, Imm8], 4);
            self.add_lw2_ext(&[0x0f, 0xba], "bts", &[Rm, Imm8], 5);
            self.add_lw2_ext(&[0x0f, 0xba], "btr", &[Rm, Imm8], 6);
            self.add_lw2_ext(&[0x0f, 0xba], "btc", &[Rm, Imm8], 7);
        }

        // Bit shift left/right.
        self.add_lw2(&[0x0f, 0xa4], "shld", &[Rm, Reg, Imm8]);
        self.add_lw2(&[0x0f, 0xa5], "shld", &[Rm, Reg, Cl]);
        self.add_lw2(&[0x0f, 0xac], "shrd", &[Rm, Reg, Imm8]);
        self.add_lw2(&[0x0f, 0xad], "shrd", &[Rm, Reg, Cl]);

        if !self.mode.nacl {
            self.add(&[0x0f, 0xaa], "rsm", &[]);
        }
        self.add_lw2(&[0x0f, 0xaf], "imul", &[Reg, Rm]);

        // Bit scan forwards/reverse.
        self.add_lw2(&[0x0f, 0xbc], "bsf", &[Reg, Rm]);
        self.add_lw2(&[0x0f, 0xbd], "bsr", &[Reg, Rm]);

        // Move with zero/sign extend.
        if self.rex.w() {
            self.add(&[0x0f, 0xb6], "movzx", &[Arg::reg(Size::B64), Arg::rm(Size::B8)]);
            self.add(&[0x0f, 0xb7], "movzx", &[Arg::reg(Size::B64), Arg::rm(Size::B16)]);
            self.add(&[0x0f, 0xbe], "movsx", &[Arg::reg(Size::B64), Arg::rm(Size::B8)]);
            self.add(&[0x0f, 0xbf], "movsx", &[Arg::reg(Size::B64), Arg::rm(Size::B16)]);
        } else {
            self.add(&[0x0f, 0xb6], "movzx", &[Arg::reg(Size::B32), Arg::rm(Size::B8)]);
            self.add_full(
                &[0x0f, 0xb6],
                "movzx",
                &[Arg::reg(Size::B16), Arg::rm(Size::B8)],
                None,
                true,
            );
            self.add(&[0x0f, 0xb7], "movzx", &[Arg::reg(Size::B32), Arg::rm(Size::B16)]);
            self.add(&[0x0f, 0xbe], "movsx", &[Arg::reg(Size::B32), Arg::rm(Size::B8)]);
            self.add_full(
                &[0x0f, 0xbe],
                "movsx",
                &[Arg::reg(Size::B16), Arg::rm(Size::B8)],
                None,
                true,
            );
            self.add(&[0x0f, 0xbf], "movsx", &[Arg::reg(Size::B32), Arg::rm(Size::B16)]);
        }

        // x86-64 only; on x86-32 this opcode is arpl. Without REX.W it
        // would zero-extend, which is what plain mov does.
        if self.rex.w() {
            self.add(&[0x63], "movsxd", &[Arg::reg(Size::B64), Arg::rm(Size::B32)]);
        }

        self.add_lw2(&[0xf3, 0x0f, 0xb8], "popcnt", &[Reg, Rm]);
        self.add_lw2(&[0xf3, 0x0f, 0xbd], "lzcnt", &[Reg, Rm]);

        // Added in the 486.
        self.add_pair2(0x0f, 0xb0, "cmpxchg", &[Rm, Reg]);
        self.add_pair2(0x0f, 0xc0, "xadd", &[Rm, Reg]);
        // Group 9 just contains cmpxchg.
        if self.rex.w() {
            self.add_ext(&[0x0f, 0xc7], "cmpxchg16b", &[Arg::mem(Size::B128)], 1);
        } else {
            self.add_ext(&[0x0f, 0xc7], "cmpxchg8b", &[Arg::mem(Size::B64)], 1);
        }
        for reg_num in 0..8 {
            // bswap is undefined with the data16 prefix, although
            // objdump decodes such instructions.
            self.add(
                &[0x0f, 0xc8 + reg_num],
                "bswap",
                &[Arg::new(ArgKind::FixReg(reg_num), self.rex_size(Size::B32))],
            );
        }

        self.add_form(&[0x0f, 0xc2], "cmpps", "Vps Wps Ib");
        self.add_form(&[0xf3, 0x0f, 0xc2], "cmpss", "Vss Wss Ib");
        self.add_form(&[0x66, 0x0f, 0xc2], "cmppd", "Vpd Wpd Ib");
        self.add_form(&[0xf2, 0x0f, 0xc2], "cmpsd", "Vsd Wsd Ib");
        // binutils disassembles movnti with QWORD PTR even though its
        // assembler only accepts DWORD PTR.
        self.add(
            &[0x0f, 0xc3],
            "FIXME movnti",
            &[Arg::mem(Size::B32), Arg::reg(Size::B32)],
        );
        self.add_form(&[0x0f, 0xc6], "shufps", "Vps Wps Ib");
        self.add_form(&[0x66, 0x0f, 0xc6], "shufpd", "Vpd Wpd Ib");

        self.add_form(&[0x66, 0x0f, 0xd0], "addsubpd", "Vpd Wpd");
        self.add_form(&[0xf2, 0x0f, 0xd0], "addsubps", "Vps Wps");
        self.add_sse_mmx_pair(0xd1, "psrlw");
        self.add_sse_mmx_pair(0xd2, "psrld");
        self.add_sse_mmx_pair(0xd3, "psrlq");
        self.add_sse_mmx_pair(0xd4, "paddq");
        self.add_sse_mmx_pair(0xd5, "pmullw");
        self.add_form(&[0xf3, 0x0f, 0xd6], "movq2dq", "Vdq Nq");
        self.add_form(&[0x66, 0x0f, 0xd6], "movq", "Wq Vq");
        self.add_form(&[0xf2, 0x0f, 0xd6], "movdq2q", "Pq Uq");
        self.add_sse_mmx_pair(0xd8, "psubusb");
        self.add_sse_mmx_pair(0xd9, "psubusw");
        self.add_sse_mmx_pair(0xda, "pminub");
        self.add_sse_mmx_pair(0xdb, "pand");
        self.add_sse_mmx_pair(0xdc, "paddusb");
        self.add_sse_mmx_pair(0xdd, "paddusw");
        self.add_sse_mmx_pair(0xde, "pmaxub");
        self.add_sse_mmx_pair(0xdf, "pandn");

        self.add_sse_mmx_pair(0xe0, "pavgb");
        self.add_sse_mmx_pair(0xe1, "psraw");
        self.add_sse_mmx_pair(0xe2, "psrad");
        self.add_sse_mmx_pair(0xe3, "pavgw");
        self.add_sse_mmx_pair(0xe4, "pmulhuw");
        self.add_sse_mmx_pair(0xe5, "pmulhw");
        self.add_form(&[0xf3, 0x0f, 0xe6], "cvtdq2pd", "Vpd Wq");
        self.add_form(&[0x66, 0x0f, 0xe6], "cvttpd2dq", "Vq Wpd");
        self.add_form(&[0xf2, 0x0f, 0xe6], "cvtpd2dq", "Vq Wpd");
        self.add_form(&[0x0f, 0xe7], "movntq", "Mq Pq");
        self.add_form(&[0x66, 0x0f, 0xe7], "movntdq", "Mdq Vdq");
        self.add_sse_mmx_pair(0xe8, "psubsb");
        self.add_sse_mmx_pair(0xe9, "psubsw");
        self.add_sse_mmx_pair(0xea, "pminsw");
        self.add_sse_mmx_pair(0xeb, "por");
        self.add_sse_mmx_pair(0xec, "paddsb");
        self.add_sse_mmx_pair(0xed, "paddsw");
        self.add_sse_mmx_pair(0xee, "pmaxsw");
        self.add_sse_mmx_pair(0xef, "pxor");

        // Should be Vpd Mdq, but objdump omits the XMMWORD string.
        self.add(&[0xf2, 0x0f, 0xf0], "lddqu", &[Arg::reg(Size::Xmm), Arg::mem(Size::LddquSize)]);
        self.add_sse_mmx_pair(0xf1, "psllw");
        self.add_sse_mmx_pair(0xf2, "pslld");
        self.add_sse_mmx_pair(0xf3, "psllq");
        self.add_sse_mmx_pair(0xf4, "pmuludq");
        self.add_sse_mmx_pair(0xf5, "pmaddwd");
        self.add_sse_mmx_pair(0xf6, "psadbw");
        // maskmovq/maskmovdqu need a memory access mask and stay out.
        self.add_sse_mmx_pair(0xf8, "psubb");
        self.add_sse_mmx_pair(0xf9, "psubw");
        self.add_sse_mmx_pair(0xfa, "psubd");
        self.add_sse_mmx_pair(0xfb, "psubq");
        self.add_sse_mmx_pair(0xfc, "paddb");
        self.add_sse_mmx_pair(0xfd, "paddw");
        self.add_sse_mmx_pair(0xfe, "paddd");

        // Group 15.
        if !self.mode.nacl {
            if self.rex.w() {
                self.add_ext(&[0x0f, 0xae], "fxsave64", &[Arg::mem(Size::FxsaveSize)], 0);
                self.add_ext(&[0x0f, 0xae], "fxrstor64", &[Arg::mem(Size::FxsaveSize)], 1);
            } else {
                self.add_ext(&[0x0f, 0xae], "fxsave", &[Arg::mem(Size::FxsaveSize)], 0);
                self.add_ext(&[0x0f, 0xae], "fxrstor", &[Arg::mem(Size::FxsaveSize)], 1);
            }
        }
        self.add_ext(&[0x0f, 0xae], "ldmxcsr", &[Arg::mem(Size::B32)], 2);
        self.add_ext(&[0x0f, 0xae], "stmxcsr", &[Arg::mem(Size::B32)], 3);
        // The AMD manual permits any RM value for the fences; objdump
        // only decodes the RM == 0 encodings.
        self.add(&[0x0f, 0xae, 0xe8], "lfence", &[]); // modrm_opcode=5
        self.add(&[0x0f, 0xae, 0xf0], "mfence", &[]); // modrm_opcode=6
        self.add(&[0x0f, 0xae, 0xf8], "sfence", &[]); // modrm_opcode=7
        self.add_ext(&[0x0f, 0xae], "clflush", &[Arg::mem(Size::B8)], 7);

        // x87 floating point instructions.

        self.add_fp_rm(0xd8, "fadd", 0, X87::StReg, Size::B32);
        self.add_fp_rm(0xd8, "fmul", 1, X87::StReg, Size::B32);
        self.add_fp_rm(0xd8, "fcom", 2, X87::Reg, Size::B32);
        self.add_fp_rm(0xd8, "fcomp", 3, X87::Reg, Size::B32);
        self.add_fp_rm(0xd8, "fsub", 4, X87::StReg, Size::B32);
        self.add_fp_rm(0xd8, "fsubr", 5, X87::StReg, Size::B32);
        self.add_fp_rm(0xd8, "fdiv", 6, X87::StReg, Size::B32);
        self.add_fp_rm(0xd8, "fdivr", 7, X87::StReg, Size::B32);

        self.add_fp_mem(0xd9, "fld", 0, Size::B32);
        // skip 1
        self.add_fp_mem(0xd9, "fst", 2, Size::B32);
        self.add_fp_mem(0xd9, "fstp", 3, Size::B32);
        self.add_fp_mem(0xd9, "fldenv", 4, Size::OtherX87Size);
        self.add_fp_mem(0xd9, "fldcw", 5, Size::B16);
        self.add_fp_mem(0xd9, "fnstenv", 6, Size::OtherX87Size);
        self.add_fp_mem(0xd9, "fnstcw", 7, Size::B16);

        self.add_fp_reg(0xd9, "fld", 0, X87::Reg);
        self.add_fp_reg(0xd9, "fxch", 1, X87::Reg);
        // /2:
        self.add(&[0xd9, 0xd0], "fnop", &[]);
        // /4:
        self.add(&[0xd9, 0xe0], "fchs", &[]);
        self.add(&[0xd9, 0xe1], "fabs", &[]);
        self.add(&[0xd9, 0xe4], "ftst", &[]);
        self.add(&[0xd9, 0xe5], "fxam", &[]);
        // /5:
        self.add(&[0xd9, 0xe8], "fld1", &[]);
        self.add(&[0xd9, 0xe9], "fldl2t", &[]);
        self.add(&[0xd9, 0xea], "fldl2e", &[]);
        self.add(&[0xd9, 0xeb], "fldpi", &[]);
        self.add(&[0xd9, 0xec], "fldlg2", &[]);
        self.add(&[0xd9, 0xed], "fldln2", &[]);
        self.add(&[0xd9, 0xee], "fldz", &[]);
        // /6:
        self.add(&[0xd9, 0xf0], "f2xm1", &[]);
        self.add(&[0xd9, 0xf1], "fyl2x", &[]);
        self.add(&[0xd9, 0xf2], "fptan", &[]);
        self.add(&[0xd9, 0xf3], "fpatan", &[]);
        self.add(&[0xd9, 0xf4], "fxtract", &[]);
        self.add(&[0xd9, 0xf5], "fprem1", &[]);
        self.add(&[0xd9, 0xf6], "fdecstp", &[]);
        self.add(&[0xd9, 0xf7], "fincstp", &[]);
        // /7:
        self.add(&[0xd9, 0xf8], "fprem", &[]);
        self.add(&[0xd9, 0xf9], "fyl2xp1", &[]);
        self.add(&[0xd9, 0xfa], "fsqrt", &[]);
        self.add(&[0xd9, 0xfb], "fsincos", &[]);
        self.add(&[0xd9, 0xfc], "frndint", &[]);
        self.add(&[0xd9, 0xfd], "fscale", &[]);
        self.add(&[0xd9, 0xfe], "fsin", &[]);
        self.add(&[0xd9, 0xff], "fcos", &[]);

        self.add_fp_mem(0xda, "fiadd", 0, Size::B32);
        self.add_fp_mem(0xda, "fimul", 1, Size::B32);
        self.add_fp_mem(0xda, "ficom", 2, Size::B32);
        self.add_fp_mem(0xda, "ficomp", 3, Size::B32);
        self.add_fp_mem(0xda, "fisub", 4, Size::B32);
        self.add_fp_mem(0xda, "fisubr", 5, Size::B32);
        self.add_fp_mem(0xda, "fidiv", 6, Size::B32);
        self.add_fp_mem(0xda, "fidivr", 7, Size::B32);

        self.add_fp_reg(0xda, "fcmovb", 0, X87::StReg);
        self.add_fp_reg(0xda, "fcmove", 1, X87::StReg);
        self.add_fp_reg(0xda, "fcmovbe", 2, X87::StReg);
        self.add_fp_reg(0xda, "fcmovu", 3, X87::StReg);
        self.add(&[0xda, 0xe9], "fucompp", &[]);

        self.add_fp_mem(0xdb, "fild", 0, Size::B32);
        self.add_fp_mem(0xdb, "fisttp", 1, Size::B32);
        self.add_fp_mem(0xdb, "fist", 2, Size::B32);
        self.add_fp_mem(0xdb, "fistp", 3, Size::B32);
        // skip 4 and 6
        self.add_fp_mem(0xdb, "fld", 5, Size::B80);
        self.add_fp_mem(0xdb, "fstp", 7, Size::B80);

        self.add_fp_reg(0xdb, "fcmovnb", 0, X87::StReg);
        self.add_fp_reg(0xdb, "fcmovne", 1, X87::StReg);
        self.add_fp_reg(0xdb, "fcmovnbe", 2, X87::StReg);
        self.add_fp_reg(0xdb, "fcmovnu", 3, X87::StReg);
        // /4:
        self.add(&[0xdb, 0xe2], "fnclex", &[]);
        self.add(&[0xdb, 0xe3], "fninit", &[]);
        self.add_fp_reg(0xdb, "fucomi", 5, X87::StReg);
        self.add_fp_reg(0xdb, "fcomi", 6, X87::StReg);

        self.add_fp_rm(0xdc, "fadd", 0, X87::RegSt, Size::B64);
        self.add_fp_rm(0xdc, "fmul", 1, X87::RegSt, Size::B64);
        self.add_fp_mem(0xdc, "fcom", 2, Size::B64);
        self.add_fp_mem(0xdc, "fcomp", 3, Size::B64);
        self.add_fp_rm(0xdc, "fsub", 4, X87::RegSt, Size::B64);
        self.add_fp_rm(0xdc, "fsubr", 5, X87::RegSt, Size::B64);
        self.add_fp_rm(0xdc, "fdiv", 6, X87::RegSt, Size::B64);
        self.add_fp_rm(0xdc, "fdivr", 7, X87::RegSt, Size::B64);

        self.add_fp_mem(0xdd, "fld", 0, Size::B64);
        self.add_fp_mem(0xdd, "fisttp", 1, Size::B64);
        self.add_fp_rm(0xdd, "fst", 2, X87::Reg, Size::B64);
        self.add_fp_rm(0xdd, "fstp", 3, X87::Reg, Size::B64);
        self.add_fp_mem(0xdd, "frstor", 4, Size::OtherX87Size);
        // skip 5
        self.add_fp_mem(0xdd, "fnsave", 6, Size::OtherX87Size);
        self.add_fp_mem(0xdd, "fnstsw", 7, Size::B16);
        self.add_fp_reg(0xdd, "ffree", 0, X87::Reg);
        // skip 1, 6, 7
        self.add_fp_reg(0xdd, "fucom", 4, X87::Reg);
        self.add_fp_reg(0xdd, "fucomp", 5, X87::Reg);

        self.add_fp_mem(0xde, "fiadd", 0, Size::B16);
        self.add_fp_mem(0xde, "fimul", 1, Size::B16);
        self.add_fp_mem(0xde, "ficom", 2, Size::B16);
        self.add_fp_mem(0xde, "ficomp", 3, Size::B16);
        self.add_fp_mem(0xde, "fisub", 4, Size::B16);
        self.add_fp_mem(0xde, "fisubr", 5, Size::B16);
        self.add_fp_mem(0xde, "fidiv", 6, Size::B16);
        self.add_fp_mem(0xde, "fidivr", 7, Size::B16);

        self.add_fp_reg(0xde, "faddp", 0, X87::RegSt);
        self.add_fp_reg(0xde, "fmulp", 1, X87::RegSt);
        // skip 2
        self.add(&[0xde, 0xd9], "fcompp", &[]);
        self.add_fp_reg(0xde, "fsubp", 4, X87::RegSt);
        self.add_fp_reg(0xde, "fsubrp", 5, X87::RegSt);
        self.add_fp_reg(0xde, "fdivp", 6, X87::RegSt);
        self.add_fp_reg(0xde, "fdivrp", 7, X87::RegSt);

        self.add_fp_mem(0xdf, "fild", 0, Size::B16);
        self.add_fp_mem(0xdf, "fisttp", 1, Size::B16);
        self.add_fp_mem(0xdf, "fist", 2, Size::B16);
        self.add_fp_mem(0xdf, "fistp", 3, Size::B16);
        self.add_fp_mem(0xdf, "fbld", 4, Size::B80);
        self.add_fp_mem(0xdf, "fild", 5, Size::B64);
        self.add_fp_mem(0xdf, "fbstp", 6, Size::B80);
        self.add_fp_mem(0xdf, "fistp", 7, Size::B64);
        // skip 0-3
        self.add(&[0xdf, 0xe0], "fnstsw", &[Arg::new(ArgKind::Ax, Size::B16)]);
        self.add_fp_reg(0xdf, "fucomip", 5, X87::StReg);
        self.add_fp_reg(0xdf, "fcomip", 6, X87::StReg);
        // skip 7

        self.add_3dnow(&[
            (0x90, "pfcmpge"),
            (0xa0, "pfcmpgt"),
            (0xb0, "pfcmpeq"),
            (0x94, "pfmin"),
            (0xa4, "pfmax"),
            (0xb4, "pfmul"),
            (0x96, "pfrcp"),
            (0xa6, "pfrcpit1"),
            (0xb6, "pfrcpit2"),
            (0x97, "pfrsqrt"),
            (0xa7, "pfrsqit1"),
            (0xb7, "pmulhrw"),
            (0x0c, "pi2fw"),
            (0x1c, "pf2iw"),
            (0x0d, "pi2fd"),
            (0x1d, "pf2id"),
            (0x8a, "pfnacc"),
            (0x9a, "pfsub"),
            (0xaa, "pfsubr"),
            (0xbb, "pswapd"),
            (0x8e, "pfpnacc"),
            (0x9e, "pfadd"),
            (0xae, "pfacc"),
            (0xbf, "pavgusb"),
        ]);
    }
}

/// Split leading legacy size prefixes (`66`, `f2`, `f3`) from the rest
/// of an opcode byte sequence. A REX prefix must land between the two.
pub(crate) fn split_prefixes(bytes: &[u8]) -> (&[u8], &[u8]) {
    let index = bytes
        .iter()
        .position(|byte| !matches!(byte, 0x66 | 0xf2 | 0xf3))
        .unwrap_or(bytes.len());
    bytes.split_at(index)
}

/// All (prefix bytes, subtree) pairs of one REX combination.
pub(crate) fn core_root(b: &mut Builder, rex: Rex, mode: Mode) -> Vec<(Vec<u8>, NodeId)> {
    let mut core = CoreBuilder {
        b,
        rex,
        mode,
        out: Vec::new(),
    };
    core.instructions();
    core.out
}

/// The instruction trie for one mode across the 17 REX cases.
pub fn rex_root(b: &mut Builder, mode: Mode) -> NodeId {
    let mut nodes = Vec::new();
    for (bytes, node) in core_root(b, Rex::NONE, mode) {
        nodes.push(b.trie.of_bytes(&bytes, node));
    }
    for rex_bits in 0u8..0x10 {
        let rex = Rex::present(RexBits::from_bits_truncate(rex_bits));
        for (bytes, node) in core_root(b, rex, mode) {
            let (prefixes, rest) = split_prefixes(&bytes);
            let tail = b.trie.of_bytes(rest, node);
            let keep = matches!(rex_bits, 0 | 7 | 8 | 0xf);
            let labeled = b
                .trie
                .label(LabelKey::TestKeep, LabelValue::Bool(keep), tail);
            let mut full = prefixes.to_vec();
            full.push(0x40 | rex_bits);
            nodes.push(b.trie.of_bytes(&full, labeled));
        }
    }
    merge_many(b.trie, &nodes, &no_merge)
}

/// The complete labeled trie: the plain enumeration merged with the
/// `f0`-prefixed lockable subset.
pub fn build_root(b: &mut Builder, nacl: bool) -> NodeId {
    info!("core instructions");
    let core = rex_root(
        b,
        Mode {
            nacl,
            ..Mode::default()
        },
    );
    info!("locked instructions");
    let lockable = rex_root(
        b,
        Mode {
            nacl,
            mem_access_only: true,
            lockable_only: true,
            gs_access_only: false,
        },
    );
    let labeled = b.trie.label(LabelKey::LockPrefix, LabelValue::Unit, lockable);
    let lock = b.trie.of_bytes(&[0xf0], labeled);
    info!("merge");
    merge(b.trie, core, lock, &no_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_trie::Trie;

    #[test]
    fn split_prefixes_stops_at_the_first_opcode_byte() {
        assert_eq!(split_prefixes(&[0x66, 0x0f, 0xba]), (&[0x66][..], &[0x0f, 0xba][..]));
        assert_eq!(split_prefixes(&[0xf3, 0x0f, 0xb8]), (&[0xf3][..], &[0x0f, 0xb8][..]));
        assert_eq!(split_prefixes(&[0x01]), (&[][..], &[0x01][..]));
        assert_eq!(
            split_prefixes(&[0x66, 0xf3, 0x90]),
            (&[0x66, 0xf3][..], &[0x90][..])
        );
    }

    #[test]
    fn lockable_mode_keeps_only_whitelisted_memory_forms() {
        let mut trie = Trie::new();
        let mut b = Builder::new(&mut trie);
        let root = rex_root(&mut b, Mode::nacl_lockable());
        // lock add DWORD PTR [r15], eax: REX.B, add r/m32, base r15.
        assert!(trie.accepts(root, &[0x41, 0x01, 0x07]).is_accepting());
        // Register destination: excluded.
        assert!(!trie.accepts(root, &[0x01, 0xc1]).is_accepting());
        // mov is not lockable at all.
        assert!(!trie.accepts(root, &[0x41, 0x89, 0x07]).is_accepting());
    }

    #[test]
    fn gs_access_mode_admits_only_mov_and_cmp() {
        let mut trie = Trie::new();
        let mut b = Builder::new(&mut trie);
        let mode = Mode {
            nacl: true,
            mem_access_only: true,
            gs_access_only: true,
            ..Mode::default()
        };
        let root = rex_root(&mut b, mode);
        assert!(trie.accepts(root, &[0x41, 0x89, 0x07]).is_accepting()); // mov [r15], eax
        assert!(trie.accepts(root, &[0x41, 0x39, 0x07]).is_accepting()); // cmp [r15], eax
        assert!(!trie.accepts(root, &[0x41, 0x01, 0x07]).is_accepting()); // add
    }

    #[test]
    fn rex_sits_between_legacy_prefixes_and_the_opcode() {
        let mut trie = Trie::new();
        let mut b = Builder::new(&mut trie);
        let root = rex_root(&mut b, Mode::nacl());
        // popcnt r8d, eax: f3 41 0f b8 c0 — REX after f3.
        assert!(trie.accepts(root, &[0xf3, 0x41, 0x0f, 0xb8, 0xc0]).is_accepting());
        // REX before the legacy prefix is not a valid encoding.
        assert!(!trie.accepts(root, &[0x41, 0xf3, 0x0f, 0xb8, 0xc0]).is_accepting());
    }
}
