//! ModR/M and SIB expansion.
//!
//! Everything here enumerates concrete ModR/M (and, where the r/m field
//! escapes, SIB) byte values consistent with an operand shape, hanging
//! displacement wildcards and operand-text labels below each byte. The
//! helpers are memoized on their full argument tuples; together with
//! node interning this is what keeps the trie in the millions of nodes
//! instead of the hundreds of millions.

use hashbrown::HashMap;
use itertools::Itertools;

use nacl_trie::merge::{merge_many, no_merge};
use nacl_trie::{Children, LabelKey, LabelValue, Node, NodeId, Token, Trie};

use crate::operand::{OperandAttrs, Size};
use crate::policy;
use crate::registers::{self, REGS64};

/// Displacement following a ModR/M or SIB byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Disp {
    /// No displacement.
    None,
    /// 8-bit displacement.
    D8,
    /// 32-bit displacement.
    D32,
}

impl Disp {
    fn len(self) -> usize {
        match self {
            Disp::None => 0,
            Disp::D8 => 1,
            Disp::D32 => 4,
        }
    }

    fn text(self) -> &'static str {
        match self {
            Disp::None => "",
            Disp::D8 => "VALUE8",
            Disp::D32 => "VALUE32",
        }
    }
}

type Labels = Vec<(LabelKey, LabelValue)>;

/// Registers admissible in an operand slot, with the labels their choice
/// emits.
///
/// Writes to protected registers are dropped unless the slot is
/// read-only; the `%esp`/`%ebp` destinations of zero-extending
/// instructions survive with a fixup obligation instead; 32-bit
/// destinations of zero-extending instructions advertise the
/// zero-extension.
pub(crate) fn operand_regs(
    attrs: OperandAttrs,
    top_bit: bool,
    regs: &'static [&'static str],
) -> Vec<(u8, &'static str, Labels)> {
    let mut out = Vec::new();
    for (reg, regname) in registers::extended_regs(top_bit, regs) {
        let reg_num = reg + ((top_bit as u8) << 3);
        let mut labels = Labels::new();
        if attrs.canzeroextend && (regname == "esp" || regname == "ebp") {
            labels.push((LabelKey::RequiresFixup, LabelValue::Reg(reg_num)));
        } else if !attrs.readonly && policy::is_unwritable(regname) {
            continue;
        } else if attrs.canzeroextend && registers::REGS32.contains(&regname) {
            labels.push((LabelKey::Zeroextends, LabelValue::Reg(reg_num)));
        }
        out.push((reg, regname, labels));
    }
    out
}

fn format_mem_access(size: Size, parts: &[&str]) -> String {
    format!(
        "{}[{}]",
        registers::mem_size_str(size),
        parts.iter().filter(|part| !part.is_empty()).join("+")
    )
}

/// Re-root `node`, wrapping every child in the given label chain.
///
/// Used when the instruction name and operand list depend on the ModR/M
/// byte (opcode extensions): the labels must apply after that byte is
/// consumed.
pub(crate) fn push_labels(trie: &mut Trie, labels: &[(LabelKey, LabelValue)], node: NodeId) -> NodeId {
    let children = match trie.get(node) {
        Node::Branch { children, .. } => children.clone(),
        Node::Label { .. } => panic!("cannot push labels through a label node"),
    };
    let mut wrapped = Children::new();
    for (token, child) in children {
        wrapped.insert(token, trie.labels(labels, child));
    }
    trie.branch(wrapped, nacl_trie::Accept::No)
}

type SibKey = (bool, bool, u8, Size, Disp, NodeId);
type MemKey = (bool, bool, Size, NodeId);
type RegKey = (bool, bool, Size, OperandAttrs, NodeId);
type ModRmKey = (
    bool,
    bool,
    bool,
    bool,
    Size,
    OperandAttrs,
    Size,
    Option<OperandAttrs>,
    bool,
    bool,
    NodeId,
);
type SingleKey = (bool, bool, bool, Size, Option<OperandAttrs>, bool, bool, u8, NodeId);

/// Memoization tables of the construction helpers, shared across all REX
/// combinations and enumeration modes of one generation run.
#[derive(Default)]
pub(crate) struct Caches {
    sib: HashMap<SibKey, NodeId>,
    modrm_mem: HashMap<MemKey, Vec<(u8, u8, NodeId)>>,
    modrm_reg: HashMap<RegKey, Vec<(u8, u8, NodeId)>>,
    modrm_node: HashMap<ModRmKey, NodeId>,
    modrm_single: HashMap<SingleKey, NodeId>,
    immediates: HashMap<u32, NodeId>,
}

/// Construction context: the interning arena plus the memo tables.
pub struct Builder<'t> {
    pub(crate) trie: &'t mut Trie,
    pub(crate) caches: Caches,
}

impl<'t> Builder<'t> {
    /// Wrap an arena for a generation run.
    pub fn new(trie: &'t mut Trie) -> Builder<'t> {
        Builder {
            trie,
            caches: Caches::default(),
        }
    }

    /// The accepting tail consuming an immediate of the given bit width.
    pub(crate) fn immediate_node(&mut self, bits: u32) -> NodeId {
        assert!(
            matches!(bits, 0 | 8 | 16 | 32 | 64),
            "unrepresentable immediate width {bits}"
        );
        if let Some(&id) = self.caches.immediates.get(&bits) {
            return id;
        }
        let tail = self.trie.accept_node();
        let node = self
            .trie
            .of_sequence(&vec![Token::Any; bits as usize / 8], tail);
        self.caches.immediates.insert(bits, node);
        node
    }

    /// SIB byte expansion for one (mod, displacement) context.
    fn sib(
        &mut self,
        rex_x: bool,
        rex_b: bool,
        modb: u8,
        rm_size: Size,
        disp: Disp,
        tail: NodeId,
    ) -> NodeId {
        let key = (rex_x, rex_b, modb, rm_size, disp, tail);
        if let Some(&id) = self.caches.sib.get(&key) {
            return id;
        }
        let mut nodes = Vec::new();
        for (index_reg, mut index_name) in registers::extended_regs(rex_x, &REGS64) {
            if index_reg == 4 && !rex_x {
                // Register 4 is no index here; objdump names the
                // always-zero value riz.
                index_name = "riz";
            }
            for scale in 0u8..4 {
                // Base 5 is a special case and is not always %rbp.
                for (base_reg, base_name) in registers::extended_regs(rex_b, &REGS64) {
                    let mut labels = Labels::new();
                    let index_text = if index_name == "riz" && base_reg == 4 && scale == 0 {
                        String::new()
                    } else {
                        if !rm_size.is_unsandboxed_mem() {
                            labels.push((
                                LabelKey::RequiresZeroextend,
                                LabelValue::Reg(index_reg + ((rex_x as u8) << 3)),
                            ));
                        }
                        format!("{index_name}*{}", 1u32 << scale)
                    };
                    let (base_name, extra, extra_disp) = if base_reg == 5 && modb == 0 {
                        ("", "VALUE32", 4usize)
                    } else {
                        (base_name, "", 0)
                    };
                    if !rm_size.is_unsandboxed_mem() && !policy::is_base_reg(base_name) {
                        continue;
                    }
                    let desc = if index_name == "riz" && base_reg == 5 && modb == 0 && scale == 0
                    {
                        format!("{}ds:VALUE32", registers::mem_size_str(rm_size))
                    } else {
                        format_mem_access(
                            rm_size,
                            &[base_name, index_text.as_str(), extra, disp.text()],
                        )
                    };
                    let sib_byte = (scale << 6) | (index_reg << 3) | base_reg;
                    labels.push((
                        LabelKey::TestKeep,
                        LabelValue::Bool(index_reg == 1 && scale == 0 && disp == Disp::D8),
                    ));
                    labels.push((LabelKey::RmArg, LabelValue::Text(desc)));
                    let disp_node = self
                        .trie
                        .of_sequence(&vec![Token::Any; disp.len() + extra_disp], tail);
                    let labeled = self.trie.labels(&labels, disp_node);
                    nodes.push(self.trie.of_bytes(&[sib_byte], labeled));
                }
            }
        }
        let node = merge_many(self.trie, &nodes, &no_merge);
        self.caches.sib.insert(key, node);
        node
    }

    /// Memory forms of the r/m field: RIP-relative, plain base with
    /// 0/8/32-bit displacement, and the SIB escape. Yields
    /// (mod, rm, subtree) triples.
    fn modrm_mem(
        &mut self,
        rex_x: bool,
        rex_b: bool,
        rm_size: Size,
        tail: NodeId,
    ) -> Vec<(u8, u8, NodeId)> {
        let key = (rex_x, rex_b, rm_size, tail);
        if let Some(cached) = self.caches.modrm_mem.get(&key) {
            return cached.clone();
        }
        let mut got = Vec::new();

        let rip_text = format!("{}[rip+VALUE32]", registers::mem_size_str(rm_size));
        let rip_label = self
            .trie
            .label(LabelKey::RmArg, LabelValue::Text(rip_text), tail);
        let rip = self.trie.of_sequence(&[Token::Any; 4], rip_label);
        got.push((0, 5, rip));

        for (modb, disp) in [(0, Disp::None), (1, Disp::D8), (2, Disp::D32)] {
            for (reg2, regname2) in registers::extended_regs(rex_b, &REGS64) {
                if !rm_size.is_unsandboxed_mem() && !policy::is_base_reg(regname2) {
                    continue;
                }
                if reg2 == 4 {
                    // Not a base register in this position: escapes to
                    // the SIB byte.
                    continue;
                }
                if reg2 == 5 && modb == 0 {
                    // RIP-relative, handled above.
                    continue;
                }
                let desc = format_mem_access(rm_size, &[regname2, disp.text()]);
                let label = self.trie.label(LabelKey::RmArg, LabelValue::Text(desc), tail);
                let node = self.trie.of_sequence(&vec![Token::Any; disp.len()], label);
                got.push((modb, reg2, node));
            }
            let sib = self.sib(rex_x, rex_b, modb, rm_size, disp, tail);
            got.push((modb, 4, sib));
        }
        self.caches.modrm_mem.insert(key, got.clone());
        got
    }

    /// Register forms of the r/m field (mod = 3).
    fn modrm_reg(
        &mut self,
        has_rex: bool,
        rex_b: bool,
        rm_size: Size,
        rm_attrs: OperandAttrs,
        tail: NodeId,
    ) -> Vec<(u8, u8, NodeId)> {
        let key = (has_rex, rex_b, rm_size, rm_attrs, tail);
        if let Some(cached) = self.caches.modrm_reg.get(&key) {
            return cached.clone();
        }
        let mut got = Vec::new();
        for (reg2, regname2, labels) in operand_regs(
            rm_attrs,
            rex_b,
            registers::regs_by_size(has_rex, rm_size),
        ) {
            let keep = reg2 == 2 || !labels.is_empty();
            let mut chain = self
                .trie
                .label(LabelKey::RmArg, LabelValue::Text(regname2.into()), tail);
            chain = self
                .trie
                .label(LabelKey::TestKeep, LabelValue::Bool(keep), chain);
            chain = self.trie.labels(&labels, chain);
            got.push((3, reg2, chain));
        }
        self.caches.modrm_reg.insert(key, got.clone());
        got
    }

    /// All permitted r/m forms for the operand shape.
    #[allow(clippy::too_many_arguments)]
    fn modrm_rm_forms(
        &mut self,
        has_rex: bool,
        rex_x: bool,
        rex_b: bool,
        rm_size: Size,
        rm_attrs: Option<OperandAttrs>,
        rm_allow_reg: bool,
        rm_allow_mem: bool,
        tail: NodeId,
    ) -> Vec<(u8, u8, NodeId)> {
        let mut got = Vec::new();
        if rm_allow_mem {
            got.extend(self.modrm_mem(rex_x, rex_b, rm_size, tail));
        }
        if rm_allow_reg {
            let attrs = rm_attrs.expect("register-capable r/m operand without attributes");
            got.extend(self.modrm_reg(has_rex, rex_b, rm_size, attrs, tail));
        }
        got
    }

    /// Full ModR/M expansion for a (reg, r/m) operand pair.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn modrm_node(
        &mut self,
        has_rex: bool,
        rex_r: bool,
        rex_x: bool,
        rex_b: bool,
        reg_size: Size,
        reg_attrs: OperandAttrs,
        rm_size: Size,
        rm_attrs: Option<OperandAttrs>,
        rm_allow_reg: bool,
        rm_allow_mem: bool,
        tail: NodeId,
    ) -> NodeId {
        let key = (
            has_rex,
            rex_r,
            rex_x,
            rex_b,
            reg_size,
            reg_attrs,
            rm_size,
            rm_attrs,
            rm_allow_reg,
            rm_allow_mem,
            tail,
        );
        if let Some(&id) = self.caches.modrm_node.get(&key) {
            return id;
        }
        let rm_forms = self.modrm_rm_forms(
            has_rex,
            rex_x,
            rex_b,
            rm_size,
            rm_attrs,
            rm_allow_reg,
            rm_allow_mem,
            tail,
        );
        let mut nodes = Vec::new();
        for (reg, regname, labels) in operand_regs(
            reg_attrs,
            rex_r,
            registers::regs_by_size(has_rex, reg_size),
        ) {
            let keep = reg == 3 || !labels.is_empty();
            for &(modb, reg2, node) in &rm_forms {
                let mut chain = self
                    .trie
                    .label(LabelKey::RegArg, LabelValue::Text(regname.into()), node);
                chain = self
                    .trie
                    .label(LabelKey::TestKeep, LabelValue::Bool(keep), chain);
                chain = self.trie.labels(&labels, chain);
                let byte = (modb << 6) | (reg << 3) | reg2;
                nodes.push(self.trie.of_bytes(&[byte], chain));
            }
        }
        let node = merge_many(self.trie, &nodes, &no_merge);
        self.caches.modrm_node.insert(key, node);
        node
    }

    /// ModR/M expansion with the reg field fixed to an opcode extension.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn modrm_single_arg(
        &mut self,
        has_rex: bool,
        rex_x: bool,
        rex_b: bool,
        rm_size: Size,
        rm_attrs: Option<OperandAttrs>,
        rm_allow_reg: bool,
        rm_allow_mem: bool,
        opcode: u8,
        tail: NodeId,
    ) -> NodeId {
        let key = (
            has_rex,
            rex_x,
            rex_b,
            rm_size,
            rm_attrs,
            rm_allow_reg,
            rm_allow_mem,
            opcode,
            tail,
        );
        if let Some(&id) = self.caches.modrm_single.get(&key) {
            return id;
        }
        let rm_forms = self.modrm_rm_forms(
            has_rex,
            rex_x,
            rex_b,
            rm_size,
            rm_attrs,
            rm_allow_reg,
            rm_allow_mem,
            tail,
        );
        let mut nodes = Vec::new();
        for (modb, reg2, node) in rm_forms {
            let byte = (modb << 6) | (opcode << 3) | reg2;
            nodes.push(self.trie.of_bytes(&[byte], node));
        }
        let node = merge_many(self.trie, &nodes, &no_merge);
        self.caches.modrm_single.insert(key, node);
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_trie::Accept;

    fn attrs(readonly: bool, canzeroextend: bool) -> OperandAttrs {
        OperandAttrs {
            readonly,
            canzeroextend,
        }
    }

    #[test]
    fn writable_slots_drop_protected_registers() {
        let regs = operand_regs(attrs(false, false), false, &registers::REGS32);
        let names: Vec<_> = regs.iter().map(|(_, name, _)| *name).collect();
        assert!(!names.contains(&"esp"));
        assert!(!names.contains(&"ebp"));
        assert!(names.contains(&"eax"));
    }

    #[test]
    fn readonly_slots_keep_protected_registers() {
        let regs = operand_regs(attrs(true, false), false, &registers::REGS32);
        let names: Vec<_> = regs.iter().map(|(_, name, _)| *name).collect();
        assert!(names.contains(&"esp"));
        assert!(names.contains(&"ebp"));
    }

    #[test]
    fn zero_extending_destinations_are_labeled() {
        let regs = operand_regs(attrs(false, true), false, &registers::REGS32);
        let ecx = regs.iter().find(|(_, name, _)| *name == "ecx").unwrap();
        assert_eq!(ecx.2, vec![(LabelKey::Zeroextends, LabelValue::Reg(1))]);
        let esp = regs.iter().find(|(_, name, _)| *name == "esp").unwrap();
        assert_eq!(esp.2, vec![(LabelKey::RequiresFixup, LabelValue::Reg(4))]);
    }

    #[test]
    fn sixteen_bit_destinations_are_not_zero_extending() {
        let regs = operand_regs(attrs(false, true), false, &registers::REGS16);
        let cx = regs.iter().find(|(_, name, _)| *name == "cx").unwrap();
        assert!(cx.2.is_empty());
    }

    #[test]
    fn memory_bases_are_restricted_to_the_sandbox_set() {
        let mut trie = Trie::new();
        let mut builder = Builder::new(&mut trie);
        let tail = builder.trie.accept_node();
        let forms = builder.modrm_mem(false, false, Size::B32, tail);
        // mod != 3 bases other than rsp/rbp (and the rip/SIB escapes)
        // must be gone.
        for &(modb, reg2, _) in &forms {
            if reg2 == 4 || (modb == 0 && reg2 == 5) {
                continue;
            }
            assert!(matches!(reg2, 4 | 5), "unexpected base register {reg2}");
        }
    }

    #[test]
    fn unsandboxed_memory_keeps_every_base() {
        let mut trie = Trie::new();
        let mut builder = Builder::new(&mut trie);
        let tail = builder.trie.accept_node();
        let forms = builder.modrm_mem(false, false, Size::LeaMem, tail);
        let mod1_bases: Vec<u8> = forms
            .iter()
            .filter(|(modb, _, _)| *modb == 1)
            .map(|(_, reg2, _)| *reg2)
            .collect();
        assert_eq!(mod1_bases, vec![0, 1, 2, 3, 5, 6, 7, 4]);
    }

    #[test]
    fn immediate_nodes_are_shared_and_sized() {
        let mut trie = Trie::new();
        let mut builder = Builder::new(&mut trie);
        let a = builder.immediate_node(32);
        let b = builder.immediate_node(32);
        assert_eq!(a, b);
        assert_eq!(builder.trie.path_count(a, true), 1u128 << 32);
        assert_eq!(builder.trie.accepts(a, &[0, 0, 0, 0]), Accept::Yes);
    }
}
