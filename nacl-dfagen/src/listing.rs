//! Flattening the labeled trie into (bytes, instruction text) listings.

use std::collections::BTreeMap;
use std::io::{self, Write};

use itertools::Itertools;

use nacl_trie::{ArgSlot, LabelKey, LabelValue, Node, NodeId, Token, Trie};

/// Labels collected along one accepting path. A later label of the same
/// key shadows an earlier one.
pub type LabelMap = BTreeMap<LabelKey, LabelValue>;

/// Visit every accepting path of the trie in byte-lexicographic order.
///
/// The callback receives the token path and the labels collected on it.
/// This order is what keeps the emitted listing aligned with the
/// disassembler's output in the cross-check.
pub fn for_each_path<F>(trie: &Trie, root: NodeId, mut visit: F)
where
    F: FnMut(&[Token], &LabelMap),
{
    let mut bytes: Vec<Token> = Vec::new();
    let mut labels: Vec<(LabelKey, LabelValue)> = Vec::new();
    walk(trie, root, &mut bytes, &mut labels, &mut visit);
}

/// Visit the accepting paths whose first bytes match `prefix`, without
/// rebuilding the trie. Labels passed on the way into the prefix are
/// seen by the callback too.
pub fn for_each_path_prefixed<F>(trie: &Trie, root: NodeId, prefix: &[u8], visit: &mut F)
where
    F: FnMut(&[Token], &LabelMap),
{
    let mut id = root;
    let mut bytes: Vec<Token> = Vec::new();
    let mut labels: Vec<(LabelKey, LabelValue)> = Vec::new();
    for &byte in prefix {
        loop {
            match trie.get(id) {
                Node::Label { key, value, next } => {
                    labels.push((*key, value.clone()));
                    id = *next;
                }
                Node::Branch { children, .. } => {
                    let Some(&child) = children.get(&Token::Byte(byte)) else {
                        return;
                    };
                    bytes.push(Token::Byte(byte));
                    id = child;
                    break;
                }
            }
        }
    }
    walk(trie, id, &mut bytes, &mut labels, visit);
}

fn walk<F>(
    trie: &Trie,
    id: NodeId,
    bytes: &mut Vec<Token>,
    labels: &mut Vec<(LabelKey, LabelValue)>,
    visit: &mut F,
) where
    F: FnMut(&[Token], &LabelMap),
{
    match trie.get(id) {
        Node::Label { key, value, next } => {
            labels.push((*key, value.clone()));
            walk(trie, *next, bytes, labels, visit);
            labels.pop();
        }
        Node::Branch { children, accept } => {
            if accept.is_accepting() {
                let map: LabelMap = labels.iter().cloned().collect();
                visit(bytes, &map);
            }
            for (&token, &child) in children {
                bytes.push(token);
                walk(trie, child, bytes, labels, visit);
                bytes.pop();
            }
        }
    }
}

/// Render the instruction text of one accepting path from its labels.
pub fn instr_from_labels(labels: &LabelMap) -> String {
    let arg_text = |slot: &ArgSlot| -> String {
        let key = match slot {
            ArgSlot::Lit(text) => return text.clone(),
            ArgSlot::Rm => LabelKey::RmArg,
            ArgSlot::Reg => LabelKey::RegArg,
            ArgSlot::Mem => LabelKey::MemArg,
        };
        labels
            .get(&key)
            .and_then(LabelValue::as_text)
            .unwrap_or_else(|| panic!("path lacks the {key:?} label its operand list names"))
            .to_owned()
    };

    let name = labels
        .get(&LabelKey::InstrName)
        .and_then(LabelValue::as_text)
        .expect("accepting path without an instruction name");
    let args = match labels.get(&LabelKey::Args) {
        Some(LabelValue::Args(slots)) => slots.as_slice(),
        Some(other) => panic!("malformed operand list label {other:?}"),
        None => &[],
    };
    let mut instr = format!(
        "{name}{}",
        args.iter().map(|slot| format!(" {}", arg_text(slot))).join(",")
    );
    if labels.contains_key(&LabelKey::LockPrefix) {
        instr = format!("lock {instr}");
    }
    instr
}

/// All (bytes, instruction text) pairs of the trie, flattened.
pub fn get_all(trie: &Trie, root: NodeId) -> Vec<(Vec<Token>, String)> {
    let mut out = Vec::new();
    for_each_path(trie, root, |bytes, labels| {
        out.push((bytes.to_vec(), instr_from_labels(labels)));
    });
    out
}

/// Write the instruction listing: one line per accepting path, hex
/// bytes, a colon, the instruction text, and the surviving semantic
/// labels as `{key:value}` suffixes.
pub fn write_instruction_list<W: Write>(out: &mut W, trie: &Trie, root: NodeId) -> io::Result<()> {
    let mut result = Ok(());
    for_each_path(trie, root, |bytes, labels| {
        if result.is_err() {
            return;
        }
        let mut suffix = String::new();
        for (key, name) in [
            (LabelKey::RequiresFixup, "requires_fixup"),
            (LabelKey::RequiresZeroextend, "requires_zeroextend"),
            (LabelKey::Zeroextends, "zeroextends"),
        ] {
            if let Some(value) = labels.get(&key) {
                let reg = value.as_reg().expect("runtime label without a register");
                suffix.push_str(&format!(" {{{name}:{reg}}}"));
            }
        }
        let line = format!(
            "{}:{}{}\n",
            bytes.iter().map(|token| token.to_string()).join(" "),
            instr_from_labels(labels),
            suffix
        );
        result = out.write_all(line.as_bytes());
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use nacl_trie::Trie;

    fn labeled_add(trie: &mut Trie) -> NodeId {
        let tail = trie.accept_node();
        let rm = trie.label(LabelKey::RmArg, LabelValue::Text("ecx".into()), tail);
        let reg = trie.label(LabelKey::RegArg, LabelValue::Text("eax".into()), rm);
        let modrm = trie.of_bytes(&[0xc1], reg);
        let args = trie.label(
            LabelKey::Args,
            LabelValue::Args(vec![ArgSlot::Rm, ArgSlot::Reg]),
            modrm,
        );
        let named = trie.label(LabelKey::InstrName, LabelValue::Text("add".into()), args);
        trie.of_bytes(&[0x01], named)
    }

    #[test]
    fn operand_slots_resolve_through_arg_labels() {
        let mut trie = Trie::new();
        let root = labeled_add(&mut trie);
        let all = get_all(&trie, root);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, vec![Token::Byte(0x01), Token::Byte(0xc1)]);
        assert_eq!(all[0].1, "add ecx, eax");
    }

    #[test]
    fn lock_paths_prepend_the_prefix() {
        let mut trie = Trie::new();
        let inner = labeled_add(&mut trie);
        let locked = trie.label(LabelKey::LockPrefix, LabelValue::Unit, inner);
        let root = trie.of_bytes(&[0xf0], locked);
        let all = get_all(&trie, root);
        assert_eq!(all[0].1, "lock add ecx, eax");
    }

    #[test]
    fn listing_lines_carry_bytes_text_and_label_suffixes() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let disp = trie.of_sequence(&[Token::Any], tail);
        let rm = trie.label(LabelKey::RmArg, LabelValue::Text("ecx".into()), disp);
        // A surviving zeroextends label on the path.
        let ze = trie.label(LabelKey::Zeroextends, LabelValue::Reg(1), rm);
        let args = trie.label(LabelKey::Args, LabelValue::Args(vec![ArgSlot::Rm]), ze);
        let named = trie.label(LabelKey::InstrName, LabelValue::Text("dec".into()), args);
        let root = trie.of_bytes(&[0xff], named);

        let mut buf = Vec::new();
        write_instruction_list(&mut buf, &trie, root).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "ff XX:dec ecx {zeroextends:1}\n"
        );
    }

    #[test]
    fn paths_flatten_in_byte_lexicographic_order() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let named = trie.label(LabelKey::InstrName, LabelValue::Text("x".into()), tail);
        let b = trie.of_bytes(&[0x02], named);
        let a = trie.of_bytes(&[0x01], named);
        let root = nacl_trie::merge::merge_many(&mut trie, &[b, a], &nacl_trie::merge::no_merge);
        let all = get_all(&trie, root);
        assert_eq!(all[0].0, vec![Token::Byte(0x01)]);
        assert_eq!(all[1].0, vec![Token::Byte(0x02)]);
    }
}
