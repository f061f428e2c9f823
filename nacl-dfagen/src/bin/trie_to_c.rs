//! Converts the serialized DFA to a C transition-table header.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use nacl_dfagen::emit;
use nacl_trie::serialize;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let trie_file = Path::new("x86_64.trie");
    let (trie, root) = serialize::read_trie(trie_file)
        .with_context(|| format!("reading {}", trie_file.display()))?;

    let header = Path::new("trie_table.h");
    let mut out = BufWriter::new(
        File::create(header).with_context(|| format!("creating {}", header.display()))?,
    );
    emit::write_c_tables(&mut out, &trie, root)
        .with_context(|| format!("writing {}", header.display()))?;
    out.flush()?;
    Ok(())
}
