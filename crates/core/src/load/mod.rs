//! Interface boundary for the external loaders that populate a table.
//!
//! The core consumes two kinds of already-parsed collaborator output: a
//! pairwise diff result ([`ParsedDiff`]) and a per-binary disassembly export
//! ([`ParsedExport`]). Parsing the underlying file formats is the
//! collaborator's job, behind [`DiffReader`] / [`ExportReader`]; the drivers
//! here turn parsed data into column insertions and attachments so the
//! insertion contract lives in exactly one place.

use std::fs;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::column::{ColumnError, MatchColumn};
use crate::model::FunctionKind;
use crate::types::{MemoryAddress, RawAddressPair};

/// Error type for loader drivers and sources.
#[derive(Debug, Error)]
pub enum LoadError {
    /// A collaborator failed to produce parsed data (malformed diff/export
    /// file, unreachable backend, ...). Carried as text because the parser
    /// lives outside this crate.
    #[error("load source error: {0}")]
    Source(String),

    /// The parsed data violated the column insertion contract (duplicate
    /// addresses, dangling parent references).
    #[error(transparent)]
    Column(#[from] ColumnError),

    /// I/O failure while hashing a binary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for loader operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Metadata of one pairwise diff result, stamped onto the column it
/// populates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffMetadata {
    /// Source filename of the diff result.
    pub filename: String,
    /// Directory the diff result was loaded from.
    pub diff_directory: String,
    /// Content hash of the binary this diff's primary side refers to.
    pub sha256: String,
}

/// A pairwise diff result reduced to matched address pairs, in the
/// function / basic block / instruction hierarchy the diff reports them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub metadata: DiffMetadata,
    pub functions: Vec<FunctionPairing>,
}

/// One matched function and its matched members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPairing {
    pub pair: RawAddressPair,
    pub basic_blocks: Vec<BasicBlockPairing>,
}

/// One matched basic block and its matched instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlockPairing {
    pub pair: RawAddressPair,
    pub instructions: Vec<RawAddressPair>,
}

/// Per-binary disassembly export, reduced to the pieces the table attaches
/// to already-inserted entities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedExport {
    /// Source filename of the export.
    pub filename: String,
    /// Content hash of the exported binary.
    pub sha256: String,
    pub functions: Vec<FunctionInfo>,
    pub basic_blocks: Vec<BasicBlockInfo>,
    pub instructions: Vec<InstructionInfo>,
}

/// Call-graph classification of one exported function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub address: MemoryAddress,
    pub kind: FunctionKind,
}

/// Signature-trimming weight of one exported basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlockInfo {
    pub address: MemoryAddress,
    pub weight: u32,
}

/// Bytes, disassembly text, and immediate operands of one exported
/// instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionInfo {
    pub address: MemoryAddress,
    pub raw_bytes: Vec<u8>,
    pub disassembly: String,
    pub immediates: Vec<u64>,
}

/// A source of parsed pairwise diff results (e.g. a BinDiff result-file
/// parser). Implemented by collaborators outside this crate.
pub trait DiffReader {
    fn read_diff(&self) -> LoadResult<ParsedDiff>;

    /// Short name of the reader, for diagnostics.
    fn name(&self) -> &'static str;
}

/// A source of parsed disassembly exports for a single binary. Implemented
/// by collaborators outside this crate.
pub trait ExportReader {
    fn read_export(&self) -> LoadResult<ParsedExport>;

    /// Short name of the reader, for diagnostics.
    fn name(&self) -> &'static str;
}

/// Add one parsed pairwise diff result to `column`.
///
/// Stamps the diff metadata, inserts every admitted function match with its
/// basic blocks and instructions, and skips the members of functions the
/// column's filter rejected (children of a filtered function are never
/// offered for insertion). When `last` is set this diff is the final one in
/// the chain, and `next` absorbs the surviving successor addresses via
/// [`MatchColumn::finish_chain`] so the last binary is representable.
pub fn add_diff_result(
    diff: &ParsedDiff,
    last: bool,
    column: &mut MatchColumn,
    next: &mut MatchColumn,
) -> LoadResult<()> {
    column.set_filename(diff.metadata.filename.clone());
    column.set_diff_directory(diff.metadata.diff_directory.clone());
    column.set_sha256(diff.metadata.sha256.clone());

    let mut filtered = 0usize;
    for function in &diff.functions {
        if column.insert_function(function.pair)?.is_none() {
            filtered += 1;
            continue;
        }
        for block in &function.basic_blocks {
            column.insert_basic_block(function.pair.address, block.pair)?;
            for &instruction in &block.instructions {
                column.insert_instruction(block.pair.address, instruction)?;
            }
        }
    }
    debug!(
        diff = %diff.metadata.filename,
        functions = diff.functions.len(),
        filtered,
        last,
        "added diff result to column"
    );

    if last {
        next.finish_chain(column);
    }
    Ok(())
}

/// Attach per-binary export data to the entities already inserted into
/// `column`.
///
/// Export files describe the whole binary while the column holds only
/// matched entities, so addresses without a match are ignored. The column
/// inherits the export's filename and content hash if the diff loader did
/// not stamp any (the terminal column is populated by `finish_chain` and
/// has no diff of its own).
pub fn add_function_data(export: &ParsedExport, column: &mut MatchColumn) {
    if column.filename().is_empty() {
        column.set_filename(export.filename.clone());
    }
    if column.sha256().is_empty() {
        column.set_sha256(export.sha256.clone());
    }

    let mut attached = 0usize;
    for function in &export.functions {
        if column.set_function_kind(function.address, function.kind) {
            attached += 1;
        }
    }
    for block in &export.basic_blocks {
        if column.set_basic_block_weight(block.address, block.weight) {
            attached += 1;
        }
    }
    for instruction in &export.instructions {
        if column.attach_instruction_data(
            instruction.address,
            instruction.raw_bytes.clone(),
            instruction.disassembly.clone(),
            instruction.immediates.clone(),
        ) {
            attached += 1;
        }
    }
    debug!(export = %export.filename, attached, "attached export data to column");
}

/// Read a diff through `reader` and add it to `column`.
pub fn load_diff<R: DiffReader>(
    reader: &R,
    last: bool,
    column: &mut MatchColumn,
    next: &mut MatchColumn,
) -> LoadResult<()> {
    let diff = reader.read_diff()?;
    debug!(reader = reader.name(), diff = %diff.metadata.filename, "read diff result");
    add_diff_result(&diff, last, column, next)
}

/// Read an export through `reader` and attach it to `column`.
pub fn load_export<R: ExportReader>(reader: &R, column: &mut MatchColumn) -> LoadResult<()> {
    let export = reader.read_export()?;
    debug!(reader = reader.name(), export = %export.filename, "read disassembly export");
    add_function_data(&export, column);
    Ok(())
}

/// Compute the SHA-256 hash of an in-memory binary and return it as a hex
/// string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the SHA-256 hash of a file and return it as a hex string.
pub fn sha256_file(path: &Path) -> LoadResult<String> {
    let file = fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
