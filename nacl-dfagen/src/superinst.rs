//! Superinstructions: multi-instruction idioms the validator treats as
//! indivisible.

use std::collections::BTreeSet;

use nacl_trie::merge::merge_many;
use nacl_trie::{Accept, LabelKey, Node, NodeId, Token, Trie};

/// Every superinstruction byte sequence: masked indirect branches,
/// stack-pointer restores, long NOPs, and sandboxed string operations.
pub fn superinsts() -> Vec<Vec<u8>> {
    let mut out: Vec<Vec<u8>> = Vec::new();

    for reg in 0u8..8 {
        // The original x86-32 validator arbitrarily disallows %esp
        // here, but we allow it.
        let mask = [
            0x83, 0xe0 | reg, 0xe0, // and $~31, %reg
            0x4c, 0x01, 0xf8 | reg, // add %r15, %reg
        ];
        let jmp = [0xff, 0xe0 | reg]; // jmp *%reg
        let call = [0xff, 0xd0 | reg]; // call *%reg
        out.push(mask.iter().chain(&jmp).copied().collect());
        out.push(mask.iter().chain(&call).copied().collect());

        // Useless 0x40 REX prefixes on the top-bit-clear forms are not
        // accepted.

        // Top-bit-set registers. Exclude r15: jumping through it would
        // trash the sandbox base and land in the bottom 4GB. Jumping
        // through rsp or rbp is allowed but useless.
        if reg != 7 {
            let mask = [
                0x41, 0x83, 0xe0 | reg, 0xe0, // and $~31, %reg
                0x4d, 0x01, 0xf8 | reg, // add %r15, %reg
            ];
            let jmp = [0x41, 0xff, 0xe0 | reg]; // jmp *%reg
            let call = [0x41, 0xff, 0xd0 | reg]; // call *%reg
            out.push(mask.iter().chain(&jmp).copied().collect());
            out.push(mask.iter().chain(&call).copied().collect());
        }
    }

    // Only the canonical register orderings.
    out.push(vec![0x48, 0x89, 0xe5]); // mov %rsp, %rbp
    out.push(vec![0x48, 0x89, 0xec]); // mov %rbp, %rsp

    // Long nops.
    let long_nops: [&[u8]; 13] = [
        &[0x0f, 0x1f, 0x00],
        &[0x0f, 0x1f, 0x40, 0x00],
        &[0x0f, 0x1f, 0x44, 0x00, 0x00],
        &[0x66, 0x0f, 0x1f, 0x44, 0x00, 0x00],
        &[0x0f, 0x1f, 0x80, 0x00, 0x00, 0x00, 0x00],
        &[0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00],
        &[
            0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00,
            0x00,
        ],
    ];
    out.extend(long_nops.iter().map(|nop| nop.to_vec()));

    // String operations, prefixed with the address fixups that pull the
    // index registers back into the sandbox.
    let fix_rsi: &[u8] = &[
        0x89, 0xf6, // mov esi, esi
        0x49, 0x8d, 0x34, 0x37, // lea rsi, [r15+rsi]
    ];
    let fix_rdi: &[u8] = &[
        0x89, 0xff, // mov edi, edi
        0x49, 0x8d, 0x3c, 0x3f, // lea rdi, [r15+rdi]
    ];
    let both: Vec<u8> = fix_rsi.iter().chain(fix_rdi).copied().collect();
    let string_ops: [(u8, &str, &[u8]); 4] = [
        (0xa4, "movs", &both),
        (0xaa, "stos", fix_rdi),
        (0xa6, "cmps", &both),
        (0xae, "scas", fix_rdi),
    ];
    for (opcode, name, fixes) in string_ops {
        for (prefix_bytes, prefix) in
            [(&[][..], ""), (&[0xf2u8][..], "repnz "), (&[0xf3u8][..], "rep ")]
        {
            // repnz is not allowed with movs/stos, though that may just
            // be a mistake in the original validator.
            if prefix == "repnz " && matches!(name, "movs" | "stos") {
                continue;
            }
            let seq = |tail: &[u8]| -> Vec<u8> {
                fixes.iter().chain(prefix_bytes).chain(tail).copied().collect()
            };
            out.push(seq(&[opcode])); // 8-bit
            // Combining the data16 prefix with rep/repnz is not
            // allowed.
            if prefix.is_empty() {
                let mut with_data16 = fixes.to_vec();
                with_data16.push(0x66);
                with_data16.extend_from_slice(prefix_bytes);
                with_data16.push(opcode + 1);
                out.push(with_data16); // 16-bit
            }
            out.push(seq(&[opcode + 1])); // 32-bit
            out.push(seq(&[0x48, opcode + 1])); // 64-bit
        }
    }

    out
}

/// Build the chain recognizing `bytes`, copying any `zeroextends`
/// labels the DFA carries along the same path so the chain can merge
/// with it.
///
/// The chain ends in a plain `normal_inst` accept state; merging unions
/// it with whatever the DFA already accepts there.
pub fn copy_in_label(trie: &mut Trie, bytes: &[u8], id: NodeId) -> NodeId {
    match trie.get(id).clone() {
        _ if bytes.is_empty() => trie.branch(Default::default(), Accept::Normal),
        Node::Label { key, value, next } => {
            assert_eq!(
                key,
                LabelKey::Zeroextends,
                "superinstruction path crosses a non-zeroextends label"
            );
            let next = copy_in_label(trie, bytes, next);
            trie.label(key, value, next)
        }
        Node::Branch { children, .. } => {
            let child = children
                .get(&Token::Byte(bytes[0]))
                .copied()
                .unwrap_or(NodeId::EMPTY);
            let tail = copy_in_label(trie, &bytes[1..], child);
            trie.of_bytes(&bytes[..1], tail)
        }
    }
}

/// Accept-merge policy of the graft: a state that completes an ordinary
/// instruction and also sits inside a superinstruction becomes a
/// `superinst_start` state. Any other collision is a bug.
pub fn merge_superinst_accepts(kinds: &BTreeSet<Accept>) -> Accept {
    let expected: BTreeSet<Accept> = [Accept::No, Accept::Normal].into_iter().collect();
    if *kinds == expected {
        Accept::SuperinstStart
    } else {
        panic!("cannot merge accept tags {kinds:?} while grafting superinstructions");
    }
}

/// Merge every superinstruction chain into the stripped, expanded DFA.
pub fn graft_superinsts(trie: &mut Trie, dfa_root: NodeId) -> NodeId {
    let mut nodes = vec![dfa_root];
    for bytes in superinsts() {
        nodes.push(copy_in_label(trie, &bytes, dfa_root));
    }
    merge_many(trie, &nodes, &merge_superinst_accepts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumeration_matches_the_expected_shape() {
        let seqs = superinsts();
        // 8 masked jmp/call pairs without REX, 7 with REX.B, 2 stack
        // restores, 13 long nops, and the string-op family.
        let masked = seqs.iter().filter(|s| s.ends_with(&[0xff, 0xe0]) || s[s.len() - 2] == 0xff).count();
        assert!(masked >= 30);
        assert!(seqs.contains(&vec![0x48, 0x89, 0xe5]));
        assert!(seqs.contains(&vec![0x48, 0x89, 0xec]));
        assert!(seqs.contains(&vec![0x0f, 0x1f, 0x00]));
        // rep movs (8-bit): fixups for both index registers, then f3 a4.
        let rep_movs: Vec<u8> = [0x89, 0xf6, 0x49, 0x8d, 0x34, 0x37, 0x89, 0xff, 0x49, 0x8d, 0x3c, 0x3f, 0xf3, 0xa4].to_vec();
        assert!(seqs.contains(&rep_movs));
        // repnz movs stays excluded.
        let repnz_movs: Vec<u8> = [0x89, 0xf6, 0x49, 0x8d, 0x34, 0x37, 0x89, 0xff, 0x49, 0x8d, 0x3c, 0x3f, 0xf2, 0xa4].to_vec();
        assert!(!seqs.contains(&repnz_movs));
        // No data16 combined with rep/repnz.
        assert!(!seqs.iter().any(|s| s.windows(2).any(|w| w == [0x66, 0xf3] || w == [0x66, 0xf2] || w == [0xf3, 0x66] || w == [0xf2, 0x66])));
    }

    #[test]
    fn r15_is_never_an_indirect_branch_target() {
        for seq in superinsts() {
            // A REX.B masked branch ends in 41 ff e0|reg or 41 ff d0|reg.
            let n = seq.len();
            if n >= 3 && seq[n - 3] == 0x41 && seq[n - 2] == 0xff {
                let reg = seq[n - 1] & 0x07;
                assert_ne!(reg, 7, "indirect branch through r15 in {seq:02x?}");
            }
        }
    }

    #[test]
    fn grafting_marks_shared_prefixes() {
        let mut trie = Trie::new();
        // A miniature DFA: "83 e0 XX" (and $imm8, %eax) accepts, with
        // the zeroextends label the real generator leaves there.
        let accept = trie.branch(Default::default(), Accept::Normal);
        let imm = trie.of_bytes(&[0xe0], accept);
        let ze = trie.label(LabelKey::Zeroextends, nacl_trie::LabelValue::Reg(0), imm);
        let and_eax = trie.of_bytes(&[0x83, 0xe0], ze);
        let add = trie.branch(Default::default(), Accept::Normal);
        let add_chain = trie.of_bytes(&[0x4c, 0x01, 0xf8], add);
        let dfa = nacl_trie::merge::merge_many(&mut trie, &[and_eax, add_chain], &nacl_trie::merge::no_merge);

        let chain_bytes = [0x83, 0xe0, 0xe0, 0x4c, 0x01, 0xf8, 0xff, 0xe0];
        let chain = copy_in_label(&mut trie, &chain_bytes, dfa);
        let grafted = merge_many(&mut trie, &[dfa, chain], &merge_superinst_accepts);

        // The full superinstruction is accepted.
        assert_eq!(trie.accepts(grafted, &chain_bytes), Accept::Normal);
        // The and-instruction prefix doubles as a superinstruction
        // start.
        assert_eq!(
            trie.accepts(grafted, &[0x83, 0xe0, 0xe0]),
            Accept::SuperinstStart
        );
        // Everything accepted before is still accepted.
        assert!(trie.accepts(grafted, &[0x4c, 0x01, 0xf8]).is_accepting());
    }
}
