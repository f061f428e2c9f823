//! Cross-checking the model against an external disassembler.
//!
//! The emitted byte strings are assembled into an object file with gcc,
//! disassembled with objdump, and each disassembled instruction is
//! compared against the generator's text after normalization. Wildcard
//! bytes are pinned to `0x11` so the sentinel constants `0x11`,
//! `0x1111`, ... can be folded back into `VALUE8`/`VALUE16`/... for the
//! comparison.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::process::Command;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use nacl_trie::Token;

/// Failures launching or running the external toolchain.
#[derive(Debug, Error)]
pub enum CrossCheckError {
    /// Scratch-file I/O failed.
    #[error("cross-check i/o: {0}")]
    Io(#[from] io::Error),
    /// The assembler or disassembler could not be launched.
    #[error("failed to launch {tool}: {source}")]
    Launch {
        /// Tool name.
        tool: &'static str,
        /// Launch error.
        source: io::Error,
    },
    /// The assembler or disassembler exited unsuccessfully.
    #[error("{tool} exited with {status}")]
    ToolFailed {
        /// Tool name.
        tool: &'static str,
        /// Exit status.
        status: std::process::ExitStatus,
    },
    /// objdump produced non-UTF-8 output.
    #[error("objdump output is not valid UTF-8")]
    BadOutput,
}

fn wildcard_byte(token: Token) -> u8 {
    match token {
        Token::Byte(byte) => byte,
        Token::Any => 0x11,
    }
}

/// Parse objdump's hex dump into (bytes, disassembly) pairs, coalescing
/// the continuation lines long instructions wrap onto.
pub fn decode_objdump(output: &str) -> Vec<(Vec<u8>, String)> {
    static LINE: OnceLock<Regex> = OnceLock::new();
    let line_re = LINE.get_or_init(|| {
        Regex::new(r"^\s*[0-9a-f]+:\s*((\S\S )+)\s*(.*)$").expect("hex-dump regex")
    });

    let mut out = Vec::new();
    let mut prev_bytes: Vec<u8> = Vec::new();
    let mut prev_disasm = String::new();
    for line in output.lines() {
        let Some(captures) = line_re.captures(line) else {
            continue;
        };
        let bytes = captures.get(1).unwrap().as_str();
        let disasm = captures.get(3).unwrap().as_str();
        if !disasm.is_empty() && !prev_disasm.is_empty() {
            out.push((std::mem::take(&mut prev_bytes), std::mem::take(&mut prev_disasm)));
        }
        for part in bytes.split_whitespace() {
            let byte = u8::from_str_radix(part, 16).expect("hex-dump byte");
            prev_bytes.push(byte);
        }
        prev_disasm.push_str(disasm);
    }
    if !prev_disasm.is_empty() {
        out.push((prev_bytes, prev_disasm));
    }
    out
}

/// Normalize one disassembled instruction for comparison: fold the
/// sentinel constants back into `VALUEn`, canonicalize whitespace and
/// comma spacing, strip trailing comments and the `.s`
/// non-canonical-encoding suffix.
pub fn normalize(disasm: &str) -> String {
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static COMMENT: OnceLock<Regex> = OnceLock::new();
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    let comment = COMMENT.get_or_init(|| Regex::new(r"\s+#.*$").expect("comment regex"));

    let folded = disasm
        .replace("0x1111111111111111", "VALUE64")
        .replace("0x11111111", "VALUE32")
        .replace("0x1111", "VALUE16")
        .replace("0x11", "VALUE8")
        .replace(',', ", ");
    let collapsed = spaces.replace_all(&folded, " ");
    let stripped = comment.replace(&collapsed, "");
    stripped.replace(".s ", " ")
}

fn run(mut command: Command, tool: &'static str) -> Result<Vec<u8>, CrossCheckError> {
    debug!(?command, "running {tool}");
    let output = command
        .output()
        .map_err(|source| CrossCheckError::Launch { tool, source })?;
    if !output.status.success() {
        return Err(CrossCheckError::ToolFailed {
            tool,
            status: output.status,
        });
    }
    Ok(output.stdout)
}

/// Assemble the instruction list, disassemble it, and compare. Returns
/// the number of mismatching instructions; each mismatch is reported on
/// standard output but does not abort generation.
pub fn disassemble_test(
    instructions: &[(Vec<Token>, String)],
    bits: u32,
) -> Result<usize, CrossCheckError> {
    let scratch = tempfile::tempdir()?;
    let source_path = scratch.path().join("check.S");
    let object_path = scratch.path().join("check.o");

    let mut source = String::new();
    for (bytes, desc) in instructions {
        let escaped: String = bytes
            .iter()
            .map(|&token| format!("\\x{:02x}", wildcard_byte(token)))
            .collect();
        writeln!(source, ".ascii \"{escaped}\" /* {desc} */").expect("string write");
    }
    fs::write(&source_path, source)?;
    info!(count = instructions.len(), "checking instructions");

    let mut gcc = Command::new("gcc");
    gcc.arg("-c")
        .arg(format!("-m{bits}"))
        .arg(&source_path)
        .arg("-o")
        .arg(&object_path);
    run(gcc, "gcc")?;

    let mut objdump = Command::new("objdump");
    objdump.args(["-M", "intel,suffix", "-d"]).arg(&object_path);
    let dump = run(objdump, "objdump")?;
    let dump = String::from_utf8(dump).map_err(|_| CrossCheckError::BadOutput)?;
    let decoded = decode_objdump(&dump);

    let mut mismatches = 0;
    for (index, (bytes, desc)) in instructions.iter().enumerate() {
        let Some((disasm_bytes, disasm_orig)) = decoded.get(index) else {
            println!("Missing ({index}): {desc:?} was not disassembled");
            mismatches += 1;
            continue;
        };
        if bytes.len() != disasm_bytes.len() {
            println!(
                "Length mismatch ({index}): {disasm_bytes:02x?} {disasm_orig:?} versus {bytes:?} {desc:?}"
            );
        }
        let disasm = normalize(disasm_orig);
        if *desc != disasm {
            println!("Mismatch ({index}): {desc:?} != {disasm:?} ({disasm_orig:?})");
            mismatches += 1;
        }
    }
    Ok(mismatches)
}
