//! Generator driver: builds the labeled trie, cross-checks the model
//! against objdump, converts it to the final DFA, and writes the three
//! outputs. Either all outputs land or none do.

use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use nacl_dfagen::{crosscheck, listing, passes, superinst, table, Builder};
use nacl_trie::{serialize, Trie};

const BITS: u32 = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    limit_address_space();
    let started = Instant::now();

    info!("building trie");
    let mut trie = Trie::new();
    let root = {
        let mut builder = Builder::new(&mut trie);
        table::build_root(&mut builder, true)
    };
    info!(elapsed = ?started.elapsed(), "labeled trie built");
    info!(
        paths = %trie.path_count(root, false),
        nodes = trie.node_count(root),
        "trie size"
    );

    info!("building test subset");
    let filtered = passes::filter_test_subset(&mut trie, root);
    let mut examples: Vec<u8> = Vec::new();
    listing::write_instruction_list(&mut examples, &trie, filtered)
        .context("rendering examples.list")?;
    info!("testing");
    let mismatches = crosscheck::disassemble_test(&listing::get_all(&trie, filtered), BITS)
        .context("cross-checking the test subset")?;
    if mismatches > 0 {
        info!(mismatches, "cross-check mismatches in the test subset");
    }

    info!("testing all ModRM bytes");
    let modrm_trie = passes::filter_prefix_rex(&mut trie, &[0x01], root);
    let mut modrm_examples: Vec<u8> = Vec::new();
    listing::write_instruction_list(&mut modrm_examples, &trie, modrm_trie)
        .context("rendering examples-modrm.list")?;
    let mismatches = crosscheck::disassemble_test(&listing::get_all(&trie, modrm_trie), BITS)
        .context("cross-checking the ModRM subset")?;
    if mismatches > 0 {
        info!(mismatches, "cross-check mismatches in the ModRM subset");
    }

    info!("converting to DFA");
    let dfa = passes::strip(&mut trie, root);
    info!(nodes = trie.node_count(dfa), "labels stripped");
    // Much faster as a separate pass after stripping: there are fewer
    // nodes left to expand.
    let dfa = passes::expand_wildcards(&mut trie, dfa);
    info!(nodes = trie.node_count(dfa), "wildcards expanded");

    info!("adding jumps");
    let dfa = superinst::graft_superinsts(&mut trie, dfa);
    info!(nodes = trie.node_count(dfa), "superinstructions grafted");

    info!("writing outputs");
    let staged = [
        ("examples.list", examples),
        ("examples-modrm.list", modrm_examples),
    ];
    for (name, data) in &staged {
        fs::write(format!("{name}.tmp"), data).with_context(|| format!("staging {name}"))?;
    }
    let trie_file = "x86_64.trie";
    serialize::write_trie(Path::new(&format!("{trie_file}.tmp")), &trie, dfa)
        .with_context(|| format!("staging {trie_file}"))?;
    for (name, _) in &staged {
        fs::rename(format!("{name}.tmp"), name).with_context(|| format!("writing {name}"))?;
    }
    fs::rename(format!("{trie_file}.tmp"), trie_file)
        .with_context(|| format!("writing {trie_file}"))?;

    info!(elapsed = ?started.elapsed(), "done");
    Ok(())
}

/// Cap the address space so a construction mistake cannot trash the
/// machine; exceeding the cap aborts the process.
#[cfg(unix)]
fn limit_address_space() {
    let limit: libc::rlim_t = 1000 << 20;
    let rlim = libc::rlimit {
        rlim_cur: limit,
        rlim_max: limit,
    };
    // Plain FFI call; the struct outlives the call.
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) };
    if rc != 0 {
        tracing::warn!("failed to apply the address-space limit");
    }
}

#[cfg(not(unix))]
fn limit_address_space() {}
