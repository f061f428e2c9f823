//! Rewriting passes over the labeled trie.
//!
//! Generation produces a transducer: a byte trie whose paths carry
//! semantic labels. The strip pass turns it into a pure acceptor with
//! typed accept states, keeping only the two labels the validator needs
//! at runtime. Wildcard expansion then makes every edge concrete so the
//! result can be merged with superinstruction chains and serialized as
//! dense tables.

use hashbrown::HashMap;

use nacl_trie::merge::{merge_many, no_merge};
use nacl_trie::{Accept, Children, LabelKey, Node, NodeId, Token, Trie};

/// Accept disposition carried down one strip-pass path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Pending {
    /// The next accepting node gets this kind.
    Kind(Accept),
    /// The next accepting node is replaced by the fixup tail.
    Replace,
}

/// Strip labels, converting the transducer into an acceptor.
///
/// `relative_jump` labels type the accept state; `requires_fixup` labels
/// splice the `add %r15, %reg` fixup instruction in place of the accept
/// state; `requires_zeroextend` and `zeroextends` survive as interned
/// label nodes; everything else is dropped.
pub fn strip(trie: &mut Trie, root: NodeId) -> NodeId {
    let mut pass = Strip {
        memo: HashMap::new(),
        fixups: HashMap::new(),
    };
    pass.rec(trie, root, Pending::Kind(Accept::Normal), None)
}

struct Strip {
    memo: HashMap<(NodeId, Pending, Option<NodeId>), NodeId>,
    fixups: HashMap<u8, NodeId>,
}

impl Strip {
    /// The fixup instruction `add %r15, %rsp/%rbp`, already stripped.
    fn stack_fixup(&mut self, trie: &mut Trie, reg: u8) -> NodeId {
        assert!(
            matches!(reg, 4 | 5),
            "stack fixup is only defined for %rsp/%rbp, got register {reg}"
        );
        if let Some(&id) = self.fixups.get(&reg) {
            return id;
        }
        let tail = trie.branch(Children::new(), Accept::Normal);
        let node = trie.of_bytes(&[0x4c, 0x01, 0xf8 | reg], tail);
        self.fixups.insert(reg, node);
        node
    }

    fn rec(
        &mut self,
        trie: &mut Trie,
        id: NodeId,
        mut pending: Pending,
        mut replace: Option<NodeId>,
    ) -> NodeId {
        let key = (id, pending, replace);
        if let Some(&out) = self.memo.get(&key) {
            return out;
        }
        let out = match trie.get(id).clone() {
            Node::Label { key, value, next } => {
                match key {
                    LabelKey::RelativeJump => {
                        assert_eq!(
                            pending,
                            Pending::Kind(Accept::Normal),
                            "relative_jump under a non-normal accept state"
                        );
                        pending = Pending::Kind(match &value {
                            nacl_trie::LabelValue::Width(1) => Accept::JumpRel1,
                            nacl_trie::LabelValue::Width(2) => Accept::JumpRel2,
                            nacl_trie::LabelValue::Width(4) => Accept::JumpRel4,
                            other => panic!("unrepresentable jump width {other:?}"),
                        });
                    }
                    LabelKey::RequiresFixup => {
                        assert_eq!(
                            pending,
                            Pending::Kind(Accept::Normal),
                            "requires_fixup under a non-normal accept state"
                        );
                        pending = Pending::Replace;
                        let reg = value.as_reg().expect("requires_fixup without a register");
                        replace = Some(self.stack_fixup(trie, reg));
                    }
                    _ => {}
                }
                let next = self.rec(trie, next, pending, replace);
                if matches!(key, LabelKey::RequiresZeroextend | LabelKey::Zeroextends) {
                    // Keep the label: it instructs the validator's
                    // runtime.
                    trie.label(key, value, next)
                } else {
                    next
                }
            }
            Node::Branch { children, accept } => {
                assert!(
                    matches!(accept, Accept::No | Accept::Yes),
                    "stripping an already-typed accept tag {accept:?}"
                );
                if accept == Accept::Yes && pending == Pending::Replace {
                    assert!(
                        children.is_empty(),
                        "fixup replacement of a state with successors"
                    );
                    replace.expect("replace disposition without a fixup tail")
                } else {
                    let accept = match (accept, pending) {
                        (Accept::Yes, Pending::Kind(kind)) => kind,
                        _ => Accept::No,
                    };
                    let mut stripped = Children::new();
                    for (token, child) in children {
                        stripped.insert(token, self.rec(trie, child, pending, replace));
                    }
                    trie.branch(stripped, accept)
                }
            }
        };
        self.memo.insert(key, out);
        out
    }
}

/// Expand wildcard edges into 256 concrete edges sharing one subtree.
///
/// Done after stripping so far fewer nodes need expanding. Expansion is
/// what lets superinstruction chains (all concrete bytes) merge into
/// displacement positions, and lets the serializer assume dense tables.
pub fn expand_wildcards(trie: &mut Trie, root: NodeId) -> NodeId {
    fn rec(trie: &mut Trie, id: NodeId, memo: &mut HashMap<NodeId, NodeId>) -> NodeId {
        if let Some(&out) = memo.get(&id) {
            return out;
        }
        let out = match trie.get(id).clone() {
            Node::Label { key, value, next } => {
                let next = rec(trie, next, memo);
                trie.label(key, value, next)
            }
            Node::Branch { children, accept } => {
                let expanded = if let Some(&dest) = children.get(&Token::Any) {
                    let dest = rec(trie, dest, memo);
                    (0u8..=255).map(|byte| (Token::Byte(byte), dest)).collect()
                } else {
                    let mut expanded = Children::new();
                    for (token, child) in children {
                        expanded.insert(token, rec(trie, child, memo));
                    }
                    expanded
                };
                trie.branch(expanded, accept)
            }
        };
        memo.insert(id, out);
        out
    }
    rec(trie, root, &mut HashMap::new())
}

/// Drop every branch marked `test_keep = false`, leaving the
/// representative subset the cross-check harness disassembles.
pub fn filter_test_subset(trie: &mut Trie, root: NodeId) -> NodeId {
    fn rec(trie: &mut Trie, id: NodeId, memo: &mut HashMap<NodeId, NodeId>) -> NodeId {
        if let Some(&out) = memo.get(&id) {
            return out;
        }
        let out = match trie.get(id).clone() {
            Node::Label { key, value, next } => {
                if key == LabelKey::TestKeep && value == nacl_trie::LabelValue::Bool(false) {
                    NodeId::EMPTY
                } else {
                    let next = rec(trie, next, memo);
                    trie.label(key, value, next)
                }
            }
            Node::Branch { children, accept } => {
                let mut kept = Children::new();
                for (token, child) in children {
                    let child = rec(trie, child, memo);
                    if child != NodeId::EMPTY {
                        kept.insert(token, child);
                    }
                }
                trie.branch(kept, accept)
            }
        };
        memo.insert(id, out);
        out
    }
    rec(trie, root, &mut HashMap::new())
}

/// Restrict a trie to the paths starting with the given bytes.
pub fn filter_prefix(trie: &mut Trie, bytes: &[u8], id: NodeId) -> NodeId {
    match bytes.split_first() {
        None => id,
        Some((&first, rest)) => match trie.get(id).clone() {
            Node::Label { key, value, next } => {
                let next = filter_prefix(trie, bytes, next);
                trie.label(key, value, next)
            }
            Node::Branch { children, accept } => {
                let child = children
                    .get(&Token::Byte(first))
                    .copied()
                    .unwrap_or(NodeId::EMPTY);
                let next = filter_prefix(trie, rest, child);
                trie.branch(Children::from([(Token::Byte(first), next)]), accept)
            }
        },
    }
}

/// [`filter_prefix`] with every REX prefix allowed before the bytes.
pub fn filter_prefix_rex(trie: &mut Trie, bytes: &[u8], root: NodeId) -> NodeId {
    let mut nodes = vec![filter_prefix(trie, bytes, root)];
    for rex_byte in 0x40u8..0x50 {
        let mut prefixed = vec![rex_byte];
        prefixed.extend_from_slice(bytes);
        nodes.push(filter_prefix(trie, &prefixed, root));
    }
    merge_many(trie, &nodes, &no_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_trie::LabelValue;

    #[test]
    fn strip_types_relative_jumps() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let disp = trie.of_sequence(&[Token::Any], tail);
        let labeled = trie.label(LabelKey::RelativeJump, LabelValue::Width(1), disp);
        let root = trie.of_bytes(&[0x74], labeled);

        let stripped = strip(&mut trie, root);
        assert_eq!(trie.accepts(stripped, &[0x74, 0x05]), Accept::JumpRel1);
    }

    #[test]
    fn strip_drops_construction_labels_but_keeps_runtime_labels() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let ze = trie.label(LabelKey::Zeroextends, LabelValue::Reg(1), tail);
        let named = trie.label(LabelKey::InstrName, LabelValue::Text("mov".into()), ze);
        let root = trie.of_bytes(&[0x89, 0xc9], named);

        let stripped = strip(&mut trie, root);
        assert_eq!(trie.accepts(stripped, &[0x89, 0xc9]), Accept::Normal);
        // The zeroextends label must still sit on the path.
        let after = trie.step(stripped, 0x89);
        match trie.get(after) {
            Node::Label { key, value, .. } => {
                assert_eq!(*key, LabelKey::Zeroextends);
                assert_eq!(*value, LabelValue::Reg(1));
            }
            Node::Branch { .. } => panic!("zeroextends label was stripped"),
        }
    }

    #[test]
    fn strip_replaces_fixup_paths_with_the_fixup_instruction() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let fix = trie.label(LabelKey::RequiresFixup, LabelValue::Reg(4), tail);
        let root = trie.of_bytes(&[0x01, 0xc4], fix);

        let stripped = strip(&mut trie, root);
        assert_eq!(trie.accepts(stripped, &[0x01, 0xc4]), Accept::No);
        assert_eq!(
            trie.accepts(stripped, &[0x01, 0xc4, 0x4c, 0x01, 0xfc]),
            Accept::Normal
        );
    }

    #[test]
    fn strip_preserves_the_accepted_language() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let imm = trie.of_sequence(&[Token::Any; 4], tail);
        let named = trie.label(LabelKey::InstrName, LabelValue::Text("call".into()), imm);
        let a = trie.of_bytes(&[0xe8], named);
        let b = trie.of_bytes(&[0x90], tail);
        let root = merge_many(&mut trie, &[a, b], &no_merge);

        let stripped = strip(&mut trie, root);
        assert_eq!(trie.path_count(root, true), trie.path_count(stripped, true));
        assert!(trie
            .accepts(stripped, &[0xe8, 0x11, 0x22, 0x33, 0x44])
            .is_accepting());
        assert!(trie.accepts(stripped, &[0x90]).is_accepting());
    }

    #[test]
    fn expansion_preserves_the_language() {
        let mut trie = Trie::new();
        let tail = trie.branch(Children::new(), Accept::Normal);
        let root = trie.of_sequence(&[Token::Byte(0xeb), Token::Any], tail);

        let expanded = expand_wildcards(&mut trie, root);
        assert_eq!(
            trie.path_count(root, true),
            trie.path_count(expanded, true)
        );
        for byte in [0x00u8, 0x7f, 0xff] {
            assert_eq!(trie.accepts(expanded, &[0xeb, byte]), Accept::Normal);
        }
        // All 256 edges share one subtree.
        let first = trie.step(expanded, 0xeb);
        assert_eq!(trie.get(first).children().len(), 256);
    }

    #[test]
    fn test_subset_filter_contracts_discarded_branches() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let kept = trie.label(LabelKey::TestKeep, LabelValue::Bool(true), tail);
        let dropped = trie.label(LabelKey::TestKeep, LabelValue::Bool(false), tail);
        let children = Children::from([
            (Token::Byte(0x01), kept),
            (Token::Byte(0x02), dropped),
        ]);
        let root = trie.branch(children, Accept::No);

        let filtered = filter_test_subset(&mut trie, root);
        assert!(trie.accepts(filtered, &[0x01]).is_accepting());
        assert!(!trie.accepts(filtered, &[0x02]).is_accepting());
    }

    #[test]
    fn prefix_filter_keeps_only_matching_paths() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let a = trie.of_bytes(&[0x01, 0xc1], tail);
        let b = trie.of_bytes(&[0x02, 0xc1], tail);
        let root = merge_many(&mut trie, &[a, b], &no_merge);

        let filtered = filter_prefix(&mut trie, &[0x01], root);
        assert!(trie.accepts(filtered, &[0x01, 0xc1]).is_accepting());
        assert!(!trie.accepts(filtered, &[0x02, 0xc1]).is_accepting());
    }
}
