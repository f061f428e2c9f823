//! Node and edge types of the interned trie.

use std::collections::BTreeMap;
use std::fmt;

/// Handle to an interned node.
///
/// Nodes are hash-consed, so two handles compare equal exactly when the
/// subtrees they denote are structurally equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The distinguished dead node: no children, not accepting.
    ///
    /// It is the zero of the merge operation and the destination of
    /// lookups that walk off the trie.
    pub const EMPTY: NodeId = NodeId(0);

    /// Raw index of the node inside its [`Trie`](crate::Trie) arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single edge token: one concrete byte value, or the wildcard standing
/// for any byte at a displacement or immediate position.
///
/// The ordering puts concrete bytes first in numeric order and the
/// wildcard last, so iterating a children map yields paths in
/// byte-lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Token {
    /// A concrete byte.
    Byte(u8),
    /// The `XX` wildcard matching any byte.
    Any,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Byte(b) => write!(f, "{b:02x}"),
            Token::Any => f.write_str("XX"),
        }
    }
}

/// Accept tag of a branch node.
///
/// The labeled transducer produced by enumeration only uses [`Accept::No`]
/// and the untyped [`Accept::Yes`]; the strip pass replaces `Yes` with one
/// of the typed kinds, and merging in superinstructions introduces
/// [`Accept::SuperinstStart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Accept {
    /// Not an accepting state.
    No,
    /// Accepting, not yet assigned a kind.
    Yes,
    /// A complete, ordinary instruction ends here.
    Normal,
    /// A complete instruction ends here and its tail is an 8-bit relative
    /// jump displacement.
    JumpRel1,
    /// 16-bit relative jump displacement variant. Never produced by the
    /// x86-64 tables but part of the accept-kind vocabulary consumed by
    /// the emitted validator tables.
    JumpRel2,
    /// 32-bit relative jump displacement variant.
    JumpRel4,
    /// A complete instruction ends here and the same state starts a
    /// multi-instruction superinstruction.
    SuperinstStart,
}

impl Accept {
    /// Whether the tag marks an accepting state of any kind.
    pub fn is_accepting(self) -> bool {
        self != Accept::No
    }
}

/// Keys of the closed label vocabulary.
///
/// `RelativeJump`, `RequiresFixup`, `RequiresZeroextend` and `Zeroextends`
/// drive (or survive) the strip pass; the remaining keys exist only during
/// construction and testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelKey {
    /// The accepting tail is a relative jump displacement of the given
    /// byte width.
    RelativeJump,
    /// The runtime must have observed a zero-extending write of the given
    /// register before this memory access.
    RequiresZeroextend,
    /// The instruction zero-extends the given register; the runtime may
    /// rely on its top 32 bits being clear afterwards.
    Zeroextends,
    /// The write to the given protected register is only permitted when
    /// immediately followed by the `add %r15, %reg` fixup instruction.
    RequiresFixup,
    /// Rendered text of the ModR/M r/m operand.
    RmArg,
    /// Rendered text of the ModR/M reg operand.
    RegArg,
    /// Rendered text of an implicit memory operand.
    MemArg,
    /// Ordered operand list of the instruction.
    Args,
    /// Instruction mnemonic.
    InstrName,
    /// Whether the path is part of the representative cross-check subset.
    TestKeep,
    /// The path is reached through a `lock` prefix.
    LockPrefix,
}

/// One operand slot in an [`LabelKey::Args`] value: either literal operand
/// text, or a reference to the `*_arg` label found further down the path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArgSlot {
    /// Literal operand text, e.g. a register name or `VALUE32`.
    Lit(String),
    /// Placeholder resolved from [`LabelKey::RmArg`].
    Rm,
    /// Placeholder resolved from [`LabelKey::RegArg`].
    Reg,
    /// Placeholder resolved from [`LabelKey::MemArg`].
    Mem,
}

/// Value carried by a label node. Which variant is legal depends on the
/// key; see [`LabelKey`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelValue {
    /// No payload (`LockPrefix`).
    Unit,
    /// Boolean payload (`TestKeep`).
    Bool(bool),
    /// A register number 0..=15 (`RequiresZeroextend`, `Zeroextends`,
    /// `RequiresFixup`).
    Reg(u8),
    /// A byte width (`RelativeJump`).
    Width(u8),
    /// Operand or mnemonic text (`RmArg`, `RegArg`, `MemArg`,
    /// `InstrName`).
    Text(String),
    /// Operand list (`Args`).
    Args(Vec<ArgSlot>),
}

impl LabelValue {
    /// The register number, if the value is `Reg`.
    pub fn as_reg(&self) -> Option<u8> {
        match self {
            LabelValue::Reg(r) => Some(*r),
            _ => None,
        }
    }

    /// The text payload, if the value is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            LabelValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Children map of a branch node.
pub type Children = BTreeMap<Token, NodeId>;

/// An interned trie node.
///
/// Branch nodes consume one byte token per edge and may accept; label
/// nodes annotate the path without consuming input and chain onto their
/// successor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    /// Byte-consuming node.
    Branch {
        /// Outgoing edges. If the wildcard is present it is the only
        /// entry.
        children: Children,
        /// Accept tag of the state.
        accept: Accept,
    },
    /// Input-transparent annotation wrapping a successor.
    Label {
        /// Annotation key.
        key: LabelKey,
        /// Annotation payload.
        value: LabelValue,
        /// Successor node.
        next: NodeId,
    },
}

impl Node {
    /// Accept tag of a branch node.
    ///
    /// # Panics
    /// Panics if called on a label node; accept tags live only on
    /// branches.
    pub fn accept(&self) -> Accept {
        match self {
            Node::Branch { accept, .. } => *accept,
            Node::Label { .. } => panic!("accept tag requested from a label node"),
        }
    }

    /// Children of a branch node.
    ///
    /// # Panics
    /// Panics if called on a label node.
    pub fn children(&self) -> &Children {
        match self {
            Node::Branch { children, .. } => children,
            Node::Label { .. } => panic!("children requested from a label node"),
        }
    }

    /// Whether this is a label node.
    pub fn is_label(&self) -> bool {
        matches!(self, Node::Label { .. })
    }
}
