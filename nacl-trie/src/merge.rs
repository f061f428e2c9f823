//! Structural union of interned tries.

use std::collections::BTreeSet;

use crate::node::{Accept, Children, Node, NodeId};
use crate::Trie;

/// Resolution policy for accept tags that disagree under merge.
///
/// The policy receives the set of distinct tags met at one state and
/// returns the tag of the merged state. It is only consulted when the
/// inputs disagree.
pub type AcceptMerge<'a> = &'a dyn Fn(&BTreeSet<Accept>) -> Accept;

/// The default policy: any collision is a programming error.
pub fn no_merge(kinds: &BTreeSet<Accept>) -> Accept {
    panic!("cannot merge accept tags {kinds:?}");
}

/// Merge nodes into one interned node under structural union.
///
/// Children maps are unioned key-wise, recursing on collisions; label
/// nodes merge only with label nodes carrying the identical annotation.
/// The empty node is the unit: merging nothing yields it, and merging it
/// with anything yields the other operand.
pub fn merge_many(trie: &mut Trie, nodes: &[NodeId], merge_accept: AcceptMerge) -> NodeId {
    match nodes {
        [] => NodeId::EMPTY,
        [only] => *only,
        _ => merge_slow(trie, nodes, merge_accept),
    }
}

/// Binary convenience wrapper over [`merge_many`].
pub fn merge(trie: &mut Trie, a: NodeId, b: NodeId, merge_accept: AcceptMerge) -> NodeId {
    merge_many(trie, &[a, b], merge_accept)
}

fn merge_slow(trie: &mut Trie, nodes: &[NodeId], merge_accept: AcceptMerge) -> NodeId {
    if let Node::Label { key, value, .. } = trie.get(nodes[0]) {
        let (key, value) = (*key, value.clone());
        let mut nexts = Vec::with_capacity(nodes.len());
        for &id in nodes {
            match trie.get(id) {
                Node::Label {
                    key: k,
                    value: v,
                    next,
                } => {
                    assert!(
                        *k == key && *v == value,
                        "merged labels disagree: {key:?}={value:?} vs {k:?}={v:?}"
                    );
                    nexts.push(*next);
                }
                Node::Branch { .. } => {
                    panic!("label node {key:?} merged with a branch node")
                }
            }
        }
        let next = merge_many(trie, &nexts, merge_accept);
        return trie.label(key, value, next);
    }

    let mut accepts = BTreeSet::new();
    let mut by_token: Children = Children::new();
    let mut colliding: Vec<(crate::node::Token, Vec<NodeId>)> = Vec::new();
    for &id in nodes {
        let node = trie.get(id);
        assert!(
            !node.is_label(),
            "branch node merged with a label node"
        );
        accepts.insert(node.accept());
        for (&token, &child) in node.children() {
            if let Some(&prev) = by_token.get(&token) {
                if prev != child {
                    match colliding.iter_mut().find(|(t, _)| *t == token) {
                        Some((_, group)) => group.push(child),
                        None => colliding.push((token, vec![prev, child])),
                    }
                }
            } else {
                by_token.insert(token, child);
            }
        }
    }
    for (token, group) in colliding {
        let merged = merge_many(trie, &group, merge_accept);
        by_token.insert(token, merged);
    }

    let accept = if accepts.len() == 1 {
        accepts.into_iter().next().unwrap()
    } else {
        merge_accept(&accepts)
    };
    trie.branch(by_token, accept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{LabelKey, LabelValue};
    use proptest::prelude::*;

    fn chain(trie: &mut Trie, bytes: &[u8]) -> NodeId {
        let tail = trie.accept_node();
        trie.of_bytes(bytes, tail)
    }

    #[test]
    fn merge_unions_languages() {
        let mut trie = Trie::new();
        let a = chain(&mut trie, &[0x01, 0xc1]);
        let b = chain(&mut trie, &[0x01, 0xc2]);
        let m = merge(&mut trie, a, b, &no_merge);
        assert!(trie.accepts(m, &[0x01, 0xc1]).is_accepting());
        assert!(trie.accepts(m, &[0x01, 0xc2]).is_accepting());
        assert!(!trie.accepts(m, &[0x01, 0xc3]).is_accepting());
    }

    #[test]
    fn empty_node_is_the_merge_unit() {
        let mut trie = Trie::new();
        let a = chain(&mut trie, &[0x90]);
        assert_eq!(merge(&mut trie, a, NodeId::EMPTY, &no_merge), a);
        assert_eq!(merge_many(&mut trie, &[], &no_merge), NodeId::EMPTY);
    }

    #[test]
    fn labels_merge_when_identical() {
        let mut trie = Trie::new();
        let tail_a = chain(&mut trie, &[0x01]);
        let tail_b = chain(&mut trie, &[0x02]);
        let a = trie.label(LabelKey::Zeroextends, LabelValue::Reg(0), tail_a);
        let b = trie.label(LabelKey::Zeroextends, LabelValue::Reg(0), tail_b);
        let m = merge(&mut trie, a, b, &no_merge);
        match trie.get(m) {
            crate::Node::Label { key, value, next } => {
                assert_eq!(*key, LabelKey::Zeroextends);
                assert_eq!(*value, LabelValue::Reg(0));
                assert!(trie.accepts(*next, &[0x01]).is_accepting());
                assert!(trie.accepts(*next, &[0x02]).is_accepting());
            }
            _ => panic!("expected a label node"),
        }
    }

    #[test]
    #[should_panic(expected = "merged labels disagree")]
    fn mismatched_labels_refuse_to_merge() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let a = trie.label(LabelKey::Zeroextends, LabelValue::Reg(0), tail);
        let b = trie.label(LabelKey::Zeroextends, LabelValue::Reg(1), tail);
        merge(&mut trie, a, b, &no_merge);
    }

    #[test]
    #[should_panic(expected = "cannot merge accept tags")]
    fn conflicting_accepts_panic_under_the_default_policy() {
        let mut trie = Trie::new();
        let a = trie.branch(Children::new(), Accept::Normal);
        let b = trie.branch(Children::new(), Accept::JumpRel1);
        merge(&mut trie, a, b, &no_merge);
    }

    proptest! {
        // Merging is associative and commutative up to node identity.
        #[test]
        fn merge_is_order_insensitive(
            seqs in proptest::collection::vec(
                proptest::collection::vec(0u8..4, 1..5),
                1..6,
            )
        ) {
            let mut trie = Trie::new();
            let nodes: Vec<NodeId> =
                seqs.iter().map(|s| chain(&mut trie, s)).collect();

            let all = merge_many(&mut trie, &nodes, &no_merge);

            let mut rev = nodes.clone();
            rev.reverse();
            let folded_rev = rev
                .into_iter()
                .fold(NodeId::EMPTY, |acc, n| merge(&mut trie, acc, n, &no_merge));
            prop_assert_eq!(all, folded_rev);

            let folded = nodes
                .iter()
                .fold(NodeId::EMPTY, |acc, &n| merge(&mut trie, acc, n, &no_merge));
            prop_assert_eq!(all, folded);
        }
    }
}
