//! Binary trie file format.
//!
//! The file is a topologically ordered dump of the nodes reachable from
//! one root: every child record precedes its parents, so a reader can
//! re-intern nodes in a single pass and reproduce identities exactly.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic    b"NACLTRIE"
//! version  u32
//! count    u32          number of node records
//! root     u32          file id of the root node
//! records  count records, file ids 1..=count in order
//! ```
//!
//! File id 0 is the implicit dead node and has no record. A branch record
//! is `0x00`, the accept tag, an edge count, then (token, file id) pairs
//! covering the transition table; token `0x0100` is the wildcard. A label
//! record is `0x01`, the key code, the register number, and the successor
//! file id. Only the two runtime label kinds (`requires_zeroextend`,
//! `zeroextends`) appear in stripped tries and only those are encodable;
//! asking to dump a construction-time label is an error.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use hashbrown::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::node::{Accept, Children, LabelKey, LabelValue, Node, NodeId, Token};
use crate::Trie;

const MAGIC: &[u8; 8] = b"NACLTRIE";
const VERSION: u32 = 1;
const TOKEN_ANY: u16 = 0x0100;

/// Errors of the trie file reader and writer.
#[derive(Debug, Error)]
pub enum TrieFileError {
    /// Underlying I/O failure.
    #[error("trie file i/o: {0}")]
    Io(#[from] io::Error),
    /// The file does not start with the trie magic.
    #[error("not a trie file (bad magic)")]
    BadMagic,
    /// The file uses a format version this reader does not know.
    #[error("unsupported trie file version {0}")]
    UnsupportedVersion(u32),
    /// A record referenced a node that has not been defined yet.
    #[error("forward node reference {0} in record {1}")]
    ForwardReference(u32, u32),
    /// Unknown record tag.
    #[error("unknown record tag {0:#04x}")]
    BadTag(u8),
    /// Unknown accept tag code.
    #[error("unknown accept code {0:#04x}")]
    BadAccept(u8),
    /// Unknown edge token.
    #[error("unknown edge token {0:#06x}")]
    BadToken(u16),
    /// Unknown label key code.
    #[error("unknown label code {0:#04x}")]
    BadLabel(u8),
    /// The trie still carries a construction-time label.
    #[error("label {0:?} has no file encoding; strip the trie first")]
    UnsupportedLabel(LabelKey),
}

fn accept_code(accept: Accept) -> u8 {
    match accept {
        Accept::No => 0,
        Accept::Yes => 1,
        Accept::Normal => 2,
        Accept::JumpRel1 => 3,
        Accept::JumpRel2 => 4,
        Accept::JumpRel4 => 5,
        Accept::SuperinstStart => 6,
    }
}

fn accept_from_code(code: u8) -> Result<Accept, TrieFileError> {
    Ok(match code {
        0 => Accept::No,
        1 => Accept::Yes,
        2 => Accept::Normal,
        3 => Accept::JumpRel1,
        4 => Accept::JumpRel2,
        5 => Accept::JumpRel4,
        6 => Accept::SuperinstStart,
        other => return Err(TrieFileError::BadAccept(other)),
    })
}

fn label_code(key: LabelKey) -> Result<u8, TrieFileError> {
    match key {
        LabelKey::RequiresZeroextend => Ok(0),
        LabelKey::Zeroextends => Ok(1),
        other => Err(TrieFileError::UnsupportedLabel(other)),
    }
}

fn label_from_code(code: u8) -> Result<LabelKey, TrieFileError> {
    match code {
        0 => Ok(LabelKey::RequiresZeroextend),
        1 => Ok(LabelKey::Zeroextends),
        other => Err(TrieFileError::BadLabel(other)),
    }
}

fn token_code(token: Token) -> u16 {
    match token {
        Token::Byte(b) => u16::from(b),
        Token::Any => TOKEN_ANY,
    }
}

fn token_from_code(code: u16) -> Result<Token, TrieFileError> {
    match code {
        0..=0xff => Ok(Token::Byte(code as u8)),
        TOKEN_ANY => Ok(Token::Any),
        other => Err(TrieFileError::BadToken(other)),
    }
}

/// Serialize the subtree under `root` to `path`.
pub fn write_trie(path: &Path, trie: &Trie, root: NodeId) -> Result<(), TrieFileError> {
    let mut out = BufWriter::new(File::create(path)?);
    write_to(&mut out, trie, root)?;
    out.flush()?;
    Ok(())
}

/// Serialize the subtree under `root` to an arbitrary writer.
pub fn write_to<W: Write>(out: &mut W, trie: &Trie, root: NodeId) -> Result<(), TrieFileError> {
    // Reachable nodes in ascending arena order. Interned children always
    // predate their parents, so this order is topological.
    let mut reachable: Vec<NodeId> = Vec::new();
    {
        let mut seen: HashMap<NodeId, ()> = HashMap::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id == NodeId::EMPTY || seen.insert(id, ()).is_some() {
                continue;
            }
            reachable.push(id);
            match trie.get(id) {
                Node::Label { next, .. } => stack.push(*next),
                Node::Branch { children, .. } => stack.extend(children.values().copied()),
            }
        }
    }
    reachable.sort_unstable();

    let mut file_id: HashMap<NodeId, u32> = HashMap::new();
    file_id.insert(NodeId::EMPTY, 0);
    for (index, &id) in reachable.iter().enumerate() {
        file_id.insert(id, index as u32 + 1);
    }

    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    out.write_all(&(reachable.len() as u32).to_le_bytes())?;
    out.write_all(&file_id[&root].to_le_bytes())?;

    for &id in &reachable {
        match trie.get(id) {
            Node::Branch { children, accept } => {
                out.write_all(&[0u8, accept_code(*accept)])?;
                out.write_all(&(children.len() as u16).to_le_bytes())?;
                for (&token, &child) in children {
                    out.write_all(&token_code(token).to_le_bytes())?;
                    out.write_all(&file_id[&child].to_le_bytes())?;
                }
            }
            Node::Label { key, value, next } => {
                let code = label_code(*key)?;
                let reg = value
                    .as_reg()
                    .unwrap_or_else(|| panic!("label {key:?} carries a non-register value"));
                out.write_all(&[1u8, code, reg])?;
                out.write_all(&file_id[next].to_le_bytes())?;
            }
        }
    }
    debug!(nodes = reachable.len(), "trie serialized");
    Ok(())
}

/// Read a trie file back, re-interning into a fresh arena.
pub fn read_trie(path: &Path) -> Result<(Trie, NodeId), TrieFileError> {
    read_from(&mut BufReader::new(File::open(path)?))
}

/// Read a serialized trie from an arbitrary reader.
pub fn read_from<R: Read>(input: &mut R) -> Result<(Trie, NodeId), TrieFileError> {
    let mut magic = [0u8; 8];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(TrieFileError::BadMagic);
    }
    let version = read_u32(input)?;
    if version != VERSION {
        return Err(TrieFileError::UnsupportedVersion(version));
    }
    let count = read_u32(input)?;
    let root = read_u32(input)?;

    let mut trie = Trie::new();
    let mut by_file_id: Vec<NodeId> = Vec::with_capacity(count as usize + 1);
    by_file_id.push(NodeId::EMPTY);

    for record in 1..=count {
        let resolve = |id: u32, nodes: &[NodeId]| -> Result<NodeId, TrieFileError> {
            nodes
                .get(id as usize)
                .copied()
                .ok_or(TrieFileError::ForwardReference(id, record))
        };
        let tag = read_u8(input)?;
        let id = match tag {
            0 => {
                let accept = accept_from_code(read_u8(input)?)?;
                let edges = read_u16(input)?;
                let mut children = Children::new();
                for _ in 0..edges {
                    let token = token_from_code(read_u16(input)?)?;
                    let child = resolve(read_u32(input)?, &by_file_id)?;
                    children.insert(token, child);
                }
                trie.branch(children, accept)
            }
            1 => {
                let key = label_from_code(read_u8(input)?)?;
                let reg = read_u8(input)?;
                let next = resolve(read_u32(input)?, &by_file_id)?;
                trie.label(key, LabelValue::Reg(reg), next)
            }
            other => return Err(TrieFileError::BadTag(other)),
        };
        by_file_id.push(id);
    }

    let root = by_file_id
        .get(root as usize)
        .copied()
        .ok_or(TrieFileError::ForwardReference(root, count))?;
    Ok((trie, root))
}

fn read_u8<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{merge, no_merge};

    fn sample(trie: &mut Trie) -> NodeId {
        let tail = trie.branch(Children::new(), Accept::Normal);
        let ze = trie.label(LabelKey::Zeroextends, LabelValue::Reg(2), tail);
        let a = trie.of_bytes(&[0x01, 0xd1], ze);
        let jmp_tail = trie.branch(Children::new(), Accept::JumpRel1);
        let b = trie.of_sequence(&[Token::Byte(0x74), Token::Any], jmp_tail);
        merge(trie, a, b, &no_merge)
    }

    #[test]
    fn round_trip_preserves_structure_and_identity() {
        let mut trie = Trie::new();
        let root = sample(&mut trie);

        let mut buf = Vec::new();
        write_to(&mut buf, &trie, root).unwrap();
        let (read, read_root) = read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(trie.node_count(root), read.node_count(read_root));
        assert_eq!(
            trie.path_count(root, true),
            read.path_count(read_root, true)
        );
        assert_eq!(read.accepts(read_root, &[0x01, 0xd1]), Accept::Normal);
        assert_eq!(read.accepts(read_root, &[0x74, 0x7f]), Accept::JumpRel1);
        assert_eq!(read.accepts(read_root, &[0x75, 0x00]), Accept::No);

        // Writing the re-read trie again is byte-identical.
        let mut buf2 = Vec::new();
        write_to(&mut buf2, &read, read_root).unwrap();
        assert_eq!(buf, buf2);
    }

    #[test]
    fn file_round_trip() {
        let mut trie = Trie::new();
        let root = sample(&mut trie);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.trie");
        write_trie(&path, &trie, root).unwrap();
        let (read, read_root) = read_trie(&path).unwrap();
        assert_eq!(read.accepts(read_root, &[0x01, 0xd1]), Accept::Normal);
    }

    #[test]
    fn construction_labels_are_rejected() {
        let mut trie = Trie::new();
        let tail = trie.accept_node();
        let root = trie.label(
            LabelKey::InstrName,
            LabelValue::Text("nop".into()),
            tail,
        );
        let mut buf = Vec::new();
        let err = write_to(&mut buf, &trie, root).unwrap_err();
        assert!(matches!(err, TrieFileError::UnsupportedLabel(_)));
    }

    #[test]
    fn bad_magic_is_reported() {
        let err = read_from(&mut &b"NOTATRIE\x01\x00\x00\x00"[..]).unwrap_err();
        assert!(matches!(err, TrieFileError::BadMagic));
    }
}
