//! Whole-pipeline scenarios over the generated NaCl DFA.

use std::sync::OnceLock;

use rstest::rstest;

use nacl_dfagen::{crosscheck, listing, passes, superinst, table, Builder};
use nacl_trie::{Accept, LabelKey, Node, NodeId, Trie};

struct Pipeline {
    trie: Trie,
    labeled: NodeId,
    filtered: NodeId,
    modrm: NodeId,
    expanded: NodeId,
    dfa: NodeId,
}

fn pipeline() -> &'static Pipeline {
    static PIPELINE: OnceLock<Pipeline> = OnceLock::new();
    PIPELINE.get_or_init(|| {
        let mut trie = Trie::new();
        let labeled = {
            let mut builder = Builder::new(&mut trie);
            table::build_root(&mut builder, true)
        };
        let filtered = passes::filter_test_subset(&mut trie, labeled);
        let modrm = passes::filter_prefix_rex(&mut trie, &[0x01], labeled);
        let stripped = passes::strip(&mut trie, labeled);
        let expanded = passes::expand_wildcards(&mut trie, stripped);
        let dfa = superinst::graft_superinsts(&mut trie, expanded);
        Pipeline {
            trie,
            labeled,
            filtered,
            modrm,
            expanded,
            dfa,
        }
    })
}

fn accepts(bytes: &[u8]) -> Accept {
    let p = pipeline();
    p.trie.accepts(p.dfa, bytes)
}

fn texts_for_prefix(prefix: &[u8]) -> Vec<String> {
    let p = pipeline();
    let mut out = Vec::new();
    listing::for_each_path_prefixed(&p.trie, p.labeled, prefix, &mut |_bytes, labels| {
        out.push(listing::instr_from_labels(labels));
    });
    out
}

#[test]
fn plain_register_add_is_a_normal_instruction() {
    assert_eq!(accepts(&[0x01, 0xc1]), Accept::Normal);
}

#[test]
fn writes_to_protected_registers_are_rejected() {
    // add %eax, %esp is only reachable through the fixup idiom.
    assert_eq!(accepts(&[0x01, 0xc4]), Accept::No);
    // test writes no operand the sandbox relies on zero-extending, so
    // there is no fixup path either.
    assert_eq!(accepts(&[0x85, 0xc4]), Accept::No);
    // inc is not on the zero-extension whitelist.
    assert_eq!(accepts(&[0xff, 0xc4]), Accept::No);
    // 16-bit and REX 8-bit views of the stack pointer stay protected.
    assert_eq!(accepts(&[0x66, 0x01, 0xc4]), Accept::No);
    assert_eq!(accepts(&[0x40, 0x00, 0xc4]), Accept::No);
    // pop %r15 would clobber the sandbox base.
    assert_eq!(accepts(&[0x41, 0x5f]), Accept::No);
}

#[test]
fn esp_writes_accept_only_with_the_trailing_fixup() {
    assert_eq!(accepts(&[0x01, 0xc4, 0x4c, 0x01, 0xfc]), Accept::Normal);
    // mov %eax, %esp takes the same fixup.
    assert_eq!(accepts(&[0x8b, 0xe0]), Accept::No);
    assert_eq!(accepts(&[0x8b, 0xe0, 0x4c, 0x01, 0xfc]), Accept::Normal);
    // %ebp variant uses the fd fixup byte.
    assert_eq!(accepts(&[0x01, 0xc5, 0x4c, 0x01, 0xfd]), Accept::Normal);
    // The wrong fixup register does not accept.
    assert_eq!(accepts(&[0x01, 0xc4, 0x4c, 0x01, 0xfd]), Accept::No);
}

#[test]
fn rip_relative_loads_accept_with_any_displacement() {
    assert_eq!(accepts(&[0x48, 0x8b, 0x05, 0x11, 0x11, 0x11, 0x11]), Accept::Normal);
    assert_eq!(accepts(&[0x48, 0x8b, 0x05, 0xde, 0xad, 0xbe, 0xef]), Accept::Normal);
}

#[rstest]
#[case::je_short("7411", Accept::JumpRel1)]
#[case::jmp_short("eb00", Accept::JumpRel1)]
#[case::jmp_near("e911223344", Accept::JumpRel4)]
#[case::call_near("e811223344", Accept::JumpRel4)]
#[case::je_near("0f8411223344", Accept::JumpRel4)]
fn relative_jumps_carry_their_displacement_width(#[case] encoding: &str, #[case] expected: Accept) {
    let bytes = hex::decode(encoding).unwrap();
    assert_eq!(accepts(&bytes), expected);
}

#[test]
fn masked_indirect_jumps_are_superinstructions() {
    let full = [0x41, 0x83, 0xe0, 0xe0, 0x4d, 0x01, 0xf8, 0x41, 0xff, 0xe0];
    assert_eq!(accepts(&full), Accept::Normal);
    // The mask instruction alone is also a complete and, so the state
    // doubles as a superinstruction start.
    assert_eq!(accepts(&[0x41, 0x83, 0xe0, 0xe0]), Accept::SuperinstStart);
    assert_eq!(
        accepts(&[0x41, 0x83, 0xe0, 0xe0, 0x4d, 0x01, 0xf8]),
        Accept::SuperinstStart
    );
    // The same through %rax without REX.
    let full = [0x83, 0xe0, 0xe0, 0x4c, 0x01, 0xf8, 0xff, 0xe0];
    assert_eq!(accepts(&full), Accept::Normal);
    // A bare indirect jump stays rejected.
    assert_eq!(accepts(&[0xff, 0xe0]), Accept::No);
    assert_eq!(accepts(&[0x41, 0xff, 0xe0]), Accept::No);
}

#[test]
fn stack_restores_and_long_nops_are_accepted() {
    assert_eq!(accepts(&[0x48, 0x89, 0xe5]), Accept::Normal); // mov %rsp, %rbp
    assert_eq!(accepts(&[0x48, 0x89, 0xec]), Accept::Normal); // mov %rbp, %rsp
    assert_eq!(accepts(&[0x0f, 0x1f, 0x44, 0x00, 0x00]), Accept::Normal);
    assert_eq!(
        accepts(&[0x66, 0x66, 0x2e, 0x0f, 0x1f, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]),
        Accept::Normal
    );
}

#[test]
fn string_operations_require_their_address_fixups() {
    let rep_stos = [0x89, 0xff, 0x49, 0x8d, 0x3c, 0x3f, 0xf3, 0xaa];
    assert_eq!(accepts(&rep_stos), Accept::Normal);
    // Without the rdi fixup the string op is not reachable.
    assert_eq!(accepts(&[0xf3, 0xaa]), Accept::No);
    // repnz stos stays excluded even with the fixup.
    let repnz_stos = [0x89, 0xff, 0x49, 0x8d, 0x3c, 0x3f, 0xf2, 0xaa];
    assert_eq!(accepts(&repnz_stos), Accept::No);
}

#[test]
fn lock_requires_a_memory_destination() {
    assert_eq!(accepts(&[0xf0, 0x01, 0xc1]), Accept::No);
    assert_eq!(accepts(&[0xf0, 0x41, 0x01, 0x07]), Accept::Normal);
    // lock mov is not a thing.
    assert_eq!(accepts(&[0xf0, 0x41, 0x89, 0x07]), Accept::No);
}

#[test]
fn memory_bases_outside_the_sandbox_set_are_rejected() {
    assert_eq!(accepts(&[0x01, 0x03]), Accept::No); // add [rbx], eax
    assert_eq!(accepts(&[0x41, 0x01, 0x07]), Accept::Normal); // add [r15], eax
    assert_eq!(accepts(&[0x01, 0x45, 0x11]), Accept::Normal); // add [rbp+disp8], eax
    assert_eq!(accepts(&[0x01, 0x04, 0x24]), Accept::Normal); // add [rsp], eax
    // lea is exempt: never dereferenced.
    assert_eq!(accepts(&[0x48, 0x8d, 0x03]), Accept::Normal); // lea rax, [rbx]
}

#[test]
fn runtime_labels_survive_into_the_dfa() {
    let p = pipeline();
    // mov %eax, %ecx zero-extends ecx: the label sits after the ModR/M
    // byte.
    let after_opcode = p.trie.step(p.dfa, 0x89);
    let after_modrm = p.trie.step(after_opcode, 0xc1);
    match p.trie.get(after_modrm) {
        Node::Label { key, value, .. } => {
            assert_eq!(*key, LabelKey::Zeroextends);
            assert_eq!(value.as_reg(), Some(1));
        }
        Node::Branch { .. } => panic!("zeroextends label missing after 89 c1"),
    }
    // A scaled index register demands a prior zero-extension.
    let after_opcode = p.trie.step(p.dfa, 0x01);
    let after_modrm = p.trie.step(after_opcode, 0x04);
    let after_sib = p.trie.step(after_modrm, 0x0c);
    match p.trie.get(after_sib) {
        Node::Label { key, value, .. } => {
            assert_eq!(*key, LabelKey::RequiresZeroextend);
            assert_eq!(value.as_reg(), Some(1));
        }
        Node::Branch { .. } => panic!("requires_zeroextend label missing after 01 04 0c"),
    }
}

#[test]
fn stripping_and_expansion_preserve_the_accepted_language_size() {
    let p = pipeline();
    let labeled = p.trie.path_count(p.labeled, true);
    let expanded = p.trie.path_count(p.expanded, true);
    assert_eq!(labeled, expanded);
    let grafted = p.trie.path_count(p.dfa, true);
    assert!(grafted >= expanded);
}

#[test]
fn grafting_is_monotone_on_sampled_strings() {
    let p = pipeline();
    for bytes in [
        &[0x90u8][..],
        &[0x01, 0xc1][..],
        &[0x74, 0x11][..],
        &[0xf0, 0x41, 0x01, 0x07][..],
        &[0x48, 0x8b, 0x05, 0x11, 0x11, 0x11, 0x11][..],
    ] {
        let before = p.trie.accepts(p.expanded, bytes);
        let after = p.trie.accepts(p.dfa, bytes);
        assert!(before.is_accepting());
        assert!(
            after == before || after == Accept::SuperinstStart,
            "graft changed {bytes:02x?} from {before:?} to {after:?}"
        );
    }
}

#[test]
fn instruction_texts_render_in_intel_syntax() {
    assert_eq!(texts_for_prefix(&[0x01, 0xc1]), vec!["add ecx, eax"]);
    assert_eq!(
        texts_for_prefix(&[0x48, 0x8b, 0x05]),
        vec!["mov rax, QWORD PTR [rip+VALUE32]"]
    );
    assert_eq!(texts_for_prefix(&[0x74]), vec!["je JUMP_DEST"]);
    assert_eq!(
        texts_for_prefix(&[0xf0, 0x41, 0x01, 0x07]),
        vec!["lock add DWORD PTR [r15], eax"]
    );
}

#[test]
fn the_test_subset_is_a_small_slice_of_the_trie() {
    let p = pipeline();
    let full = p.trie.path_count(p.labeled, false);
    let subset = p.trie.path_count(p.filtered, false);
    assert!(subset > 0);
    assert!(
        subset * 10 < full,
        "test subset ({subset}) is not much smaller than the trie ({full})"
    );
}

#[test]
fn the_modrm_subset_fixes_the_opcode_and_allows_rex() {
    let p = pipeline();
    assert!(p.trie.accepts(p.modrm, &[0x01, 0xc1]).is_accepting());
    assert!(p.trie.accepts(p.modrm, &[0x48, 0x01, 0xc1]).is_accepting());
    assert!(!p.trie.accepts(p.modrm, &[0x02, 0xc1]).is_accepting());
}

#[test]
#[ignore = "requires gcc and objdump"]
fn the_test_subset_round_trips_through_objdump() {
    let p = pipeline();
    let mismatches =
        crosscheck::disassemble_test(&listing::get_all(&p.trie, p.filtered), 64).unwrap();
    assert_eq!(mismatches, 0);
}

#[test]
#[ignore = "requires gcc and objdump"]
fn the_modrm_subset_round_trips_through_objdump() {
    let p = pipeline();
    let mismatches =
        crosscheck::disassemble_test(&listing::get_all(&p.trie, p.modrm), 64).unwrap();
    assert_eq!(mismatches, 0);
}
