//! Interned byte-trie primitives.
//!
//! The trie doubles as a prefix tree over instruction encodings and as
//! the state graph of the byte-level DFA the generator ultimately emits.
//! Nodes are immutable and hash-consed, so structural equality is id
//! equality and subtrees are shared aggressively.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod interner;
pub mod merge;
mod node;
pub mod serialize;

pub use interner::Trie;
pub use node::{Accept, ArgSlot, Children, LabelKey, LabelValue, Node, NodeId, Token};
