//! Generator for the DFA recognizing the x86-64 instruction subset the
//! NaCl sandbox policy permits.
//!
//! The pipeline: the instruction table enumerates every allowed
//! encoding into a labeled, interned trie; rewriting passes strip the
//! construction labels into typed accept states and expand the
//! displacement wildcards; the superinstruction chains are grafted on;
//! the result is serialized for the table-driven validator.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod crosscheck;
pub mod emit;
pub mod listing;
mod modrm;
pub mod operand;
pub mod passes;
pub mod policy;
pub mod registers;
pub mod rex;
pub mod superinst;
pub mod table;

pub use modrm::Builder;
