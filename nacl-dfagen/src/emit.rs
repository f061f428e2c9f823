//! Emitting the DFA as a C header with a dense transition table.
//!
//! States are renumbered so that accepting states of the same kind are
//! contiguous (a validator can then test a kind with a range check),
//! rejecting states follow, and residual label states come last. State
//! 0 is the dead state; for a little extra safety all of its
//! transitions lead back to itself.

use std::io::{self, Write};

use hashbrown::{HashMap, HashSet};
use thiserror::Error;
use tracing::info;

use nacl_trie::{Accept, LabelKey, Node, NodeId, Token, Trie};

/// Failures of the C emitter.
#[derive(Debug, Error)]
pub enum EmitError {
    /// Output I/O failed.
    #[error("emit i/o: {0}")]
    Io(#[from] io::Error),
    /// The DFA does not fit a 16-bit state type.
    #[error("too many states: {0}")]
    TooManyStates(usize),
}

fn accept_name(accept: Accept) -> Option<&'static str> {
    match accept {
        Accept::No => None,
        Accept::Normal => Some("normal_inst"),
        Accept::JumpRel1 => Some("jump_rel1"),
        Accept::JumpRel2 => Some("jump_rel2"),
        Accept::JumpRel4 => Some("jump_rel4"),
        Accept::SuperinstStart => Some("superinst_start"),
        Accept::Yes => panic!("untyped accept state reached the emitter; strip the trie first"),
    }
}

fn sort_key(trie: &Trie, id: NodeId) -> (u8, &'static str, NodeId) {
    match trie.get(id) {
        Node::Label { .. } => (2, "", id),
        Node::Branch { accept, .. } => match accept_name(*accept) {
            Some(name) => (0, name, id),
            None => (1, "", id),
        },
    }
}

/// Write the `trie_table.h` contents for the DFA rooted at `root`.
pub fn write_c_tables<W: Write>(out: &mut W, trie: &Trie, root: NodeId) -> Result<(), EmitError> {
    let mut reachable: Vec<NodeId> = Vec::new();
    {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id == NodeId::EMPTY || !seen.insert(id) {
                continue;
            }
            reachable.push(id);
            match trie.get(id) {
                Node::Label { next, .. } => stack.push(*next),
                Node::Branch { children, .. } => stack.extend(children.values().copied()),
            }
        }
    }
    reachable.sort_by_key(|&id| sort_key(trie, id));

    let mut nodes = vec![NodeId::EMPTY];
    nodes.extend(reachable);
    let node_id: HashMap<NodeId, usize> =
        nodes.iter().enumerate().map(|(index, &id)| (id, index)).collect();

    writeln!(out, "\n#include <stdint.h>\n")?;
    let state_bytes = if nodes.len() < 0x100 {
        writeln!(out, "typedef uint8_t trie_state_t;\n")?;
        1
    } else if nodes.len() < 0x10000 {
        writeln!(out, "typedef uint16_t trie_state_t;\n")?;
        2
    } else {
        return Err(EmitError::TooManyStates(nodes.len()));
    };
    info!(
        states = nodes.len(),
        table_bytes = nodes.len() * 256 * state_bytes,
        "transition table sized"
    );

    writeln!(out, "static const trie_state_t trie_start = {};\n", node_id[&root])?;

    let mut kinds: HashSet<&'static str> = nodes
        .iter()
        .filter_map(|&id| match trie.get(id) {
            Node::Branch { accept, .. } => accept_name(*accept),
            Node::Label { .. } => None,
        })
        .collect();
    // This accept kind disappears when 16-bit-offset jumps are
    // disallowed, but the validator keeps its handler around. Such
    // jumps are not unsafe and could be allowed.
    kinds.insert("jump_rel2");
    assert!(kinds.contains("jump_rel1"), "no jump_rel1 accept states");
    assert!(kinds.contains("jump_rel4"), "no jump_rel4 accept states");

    let mut kinds: Vec<&'static str> = kinds.into_iter().collect();
    kinds.sort_unstable();
    for kind in kinds {
        let acceptors: Vec<usize> = nodes
            .iter()
            .filter(|&&id| match trie.get(id) {
                Node::Branch { accept, .. } => accept_name(*accept) == Some(kind),
                Node::Label { .. } => false,
            })
            .map(|id| node_id[id])
            .collect();
        info!(kind, acceptors = acceptors.len(), "accept kind");
        let expr = if acceptors.is_empty() {
            "0 /* These instructions are currently disallowed */".to_string()
        } else {
            acceptors
                .iter()
                .map(|id| format!("node_id == {id}"))
                .collect::<Vec<_>>()
                .join(" || ")
        };
        writeln!(
            out,
            "static inline int trie_accepts_{kind}(trie_state_t node_id) {{\n  return {expr};\n}}\n"
        )?;
    }

    writeln!(
        out,
        "static inline int trie_label_transition(trie_state_t *state, \
         struct ZeroExtendState *zx_state, uint32_t *mask_dest) {{\n  \
         while (1) {{\n    switch (*state) {{"
    )?;
    for &id in &nodes {
        if let Node::Label { key, value, next } = trie.get(id) {
            let reg = value.as_reg().expect("runtime label without a register");
            let code = match key {
                LabelKey::RequiresZeroextend => format!(
                    "if (CheckZeroExtendBefore(zx_state, mask_dest, {reg})) return 1;"
                ),
                LabelKey::Zeroextends => format!("MarkZeroExtendAfter(zx_state, {reg});"),
                other => panic!("unrecognised label in the final DFA: {other:?}"),
            };
            writeln!(
                out,
                "      case {}: {} *state = {}; break;",
                node_id[&id], code, node_id[next]
            )?;
        }
    }
    writeln!(out, "      default: return 0;\n    }}\n  }}\n}}\n")?;

    write_transition_table(out, trie, &nodes, &node_id)?;
    Ok(())
}

fn write_transition_table<W: Write>(
    out: &mut W,
    trie: &Trie,
    nodes: &[NodeId],
    node_id: &HashMap<NodeId, usize>,
) -> io::Result<()> {
    writeln!(out, "static const trie_state_t trie_table[][256] = {{")?;
    for &id in nodes {
        let (row, accept_text) = match trie.get(id) {
            // Label states consume no input; their rows stay dead.
            Node::Label { .. } => ([0usize; 256], "False".to_string()),
            Node::Branch { children, accept } => {
                let mut row = [0usize; 256];
                if let Some(&dest) = children.get(&Token::Any) {
                    row = [node_id[&dest]; 256];
                } else {
                    for (&token, &child) in children {
                        match token {
                            Token::Byte(byte) => row[byte as usize] = node_id[&child],
                            Token::Any => unreachable!("wildcard beside concrete edges"),
                        }
                    }
                }
                let text = accept_name(*accept).unwrap_or("False").to_string();
                (row, text)
            }
        };
        writeln!(out, "  /* state {}: accept={} */ {{", node_id[&id], accept_text)?;
        let header: Vec<String> = (0..16).map(|lower| format!("X{lower:x}")).collect();
        writeln!(out, "{}/* {} */", " ".repeat(11), header.join("  "))?;
        for upper in 0..16 {
            let cells: Vec<String> = (0..16)
                .map(|lower| format!("{:2}", row[upper * 16 + lower]))
                .collect();
            writeln!(out, "    /* {upper:x}X */  {},", cells.join(", "))?;
        }
        writeln!(out, "  }},")?;
    }
    writeln!(out, "}};")?;
    writeln!(
        out,
        "\nstatic inline trie_state_t trie_lookup(trie_state_t state, uint8_t byte) {{\n  \
         return trie_table[state][byte];\n}}"
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_trie::{Children, LabelValue};

    #[test]
    fn emits_start_state_accept_predicates_and_table() {
        let mut trie = Trie::new();
        let normal = trie.branch(Children::new(), Accept::Normal);
        let ze = trie.label(LabelKey::Zeroextends, LabelValue::Reg(3), normal);
        let a = trie.of_bytes(&[0x89, 0xdb], ze);
        let rel1 = trie.branch(Children::new(), Accept::JumpRel1);
        let rel1_chain = trie.of_bytes(&[0x74, 0x05], rel1);
        let rel4 = trie.branch(Children::new(), Accept::JumpRel4);
        let rel4_chain = trie.of_bytes(&[0xe9, 0x00, 0x11, 0x22, 0x33], rel4);
        let root = nacl_trie::merge::merge_many(
            &mut trie,
            &[a, rel1_chain, rel4_chain],
            &nacl_trie::merge::no_merge,
        );

        let mut buf = Vec::new();
        write_c_tables(&mut buf, &trie, root).unwrap();
        let header = String::from_utf8(buf).unwrap();

        assert!(header.contains("typedef uint8_t trie_state_t;"));
        assert!(header.contains("static const trie_state_t trie_start ="));
        assert!(header.contains("trie_accepts_normal_inst"));
        assert!(header.contains("trie_accepts_jump_rel1"));
        assert!(header.contains("trie_accepts_jump_rel2"));
        assert!(header.contains("These instructions are currently disallowed"));
        assert!(header.contains("MarkZeroExtendAfter(zx_state, 3);"));
        assert!(header.contains("trie_table[][256]"));
        assert!(header.contains("trie_lookup"));
    }

    #[test]
    fn accepting_states_of_one_kind_are_contiguous() {
        let mut trie = Trie::new();
        let mut chains = Vec::new();
        for byte in 0..6u8 {
            let accept = trie.branch(
                Children::new(),
                if byte % 2 == 0 { Accept::Normal } else { Accept::JumpRel1 },
            );
            // Distinct accept states per byte.
            let tail = trie.of_bytes(&[byte, byte], accept);
            chains.push(tail);
        }
        let rel4 = trie.branch(Children::new(), Accept::JumpRel4);
        chains.push(trie.of_bytes(&[0xe9], rel4));
        let root =
            nacl_trie::merge::merge_many(&mut trie, &chains, &nacl_trie::merge::no_merge);

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Node::Branch { children, .. } = trie.get(id) {
                stack.extend(children.values().copied());
            }
        }
        order.sort_by_key(|&id| sort_key(&trie, id));
        let kinds: Vec<_> = order
            .iter()
            .map(|&id| sort_key(&trie, id).1)
            .filter(|name| !name.is_empty())
            .collect();
        let mut deduped = kinds.clone();
        deduped.dedup();
        let mut unique = deduped.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(deduped.len(), unique.len(), "accept kinds are interleaved");
    }
}
