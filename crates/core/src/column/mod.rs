//! One column of the match-chain table: all matched entities of a single
//! binary, keyed by address.
//!
//! The column's three address-keyed maps are the exclusive owners of every
//! entity. Parent-to-member links and the identity index store primary
//! addresses into those maps, never references, so nothing here can outlive
//! the column. The identity index is an explicit cache: `None` until
//! [`MatchColumn::build_id_indices`] runs, and any insertion resets it to
//! `None` again.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::model::{
    AddressMatch, BasicBlockMatch, FilterMode, FunctionKind, FunctionMatch, InstructionMatch,
};
use crate::types::{Ident, MemoryAddress, RawAddressPair};

/// Error type for column insertion. Every variant is a caller contract
/// violation; data sparsity (missing matches, absent successors) is never an
/// error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColumnError {
    /// A function match was already inserted at this address.
    #[error("duplicate function match at {address:#x}")]
    DuplicateFunction { address: MemoryAddress },

    /// A basic block match was already inserted at this address.
    #[error("duplicate basic block match at {address:#x}")]
    DuplicateBasicBlock { address: MemoryAddress },

    /// An instruction match was already inserted at this address.
    #[error("duplicate instruction match at {address:#x}")]
    DuplicateInstruction { address: MemoryAddress },

    /// A basic block was inserted under a function this column does not own.
    #[error("no function match at {address:#x} in this column")]
    UnknownFunction { address: MemoryAddress },

    /// An instruction was inserted under a basic block this column does not
    /// own.
    #[error("no basic block match at {address:#x} in this column")]
    UnknownBasicBlock { address: MemoryAddress },
}

/// Convenience result type for column operations.
pub type ColumnResult<T> = Result<T, ColumnError>;

/// Identity-keyed lookup index, derived from the owning address maps.
///
/// Basic-block identities are scoped to their enclosing function, so the
/// block index is keyed by the (function identity, block identity) pair.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct IdIndex {
    functions: BTreeMap<Ident, MemoryAddress>,
    basic_blocks: BTreeMap<(Ident, Ident), MemoryAddress>,
}

/// A single column in the match-chain table, holding one binary's matched
/// functions, basic blocks, and instructions.
#[derive(Debug, Default)]
pub struct MatchColumn {
    filename: String,
    sha256: String,
    diff_directory: String,

    function_filter: FilterMode,
    filtered_functions: HashSet<MemoryAddress>,

    // Primary indices mapping memory addresses to match entities. These own
    // the entities; everything else refers to them by address.
    functions: BTreeMap<MemoryAddress, FunctionMatch>,
    basic_blocks: BTreeMap<MemoryAddress, BasicBlockMatch>,
    instructions: BTreeMap<MemoryAddress, InstructionMatch>,

    // Identity index cache. `None` means "dirty until rebuilt".
    id_index: Option<IdIndex>,
}

impl MatchColumn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source filename of the diff/export this column was built from.
    pub fn set_filename(&mut self, filename: impl Into<String>) {
        self.filename = filename.into();
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Set the content hash of the binary represented by this column.
    pub fn set_sha256(&mut self, hash: impl Into<String>) {
        self.sha256 = hash.into();
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Set the directory the pairwise diff result was loaded from.
    pub fn set_diff_directory(&mut self, directory: impl Into<String>) {
        self.diff_directory = directory.into();
    }

    pub fn diff_directory(&self) -> &str {
        &self.diff_directory
    }

    /// Set the function filter mode. Filtering is consulted on function
    /// insertion only; configure it before population begins.
    pub fn set_function_filter(&mut self, mode: FilterMode) {
        self.function_filter = mode;
    }

    pub fn function_filter(&self) -> FilterMode {
        self.function_filter
    }

    /// Add a function address to the set of filtered functions. Whether the
    /// set acts as a blacklist or whitelist is controlled by
    /// [`MatchColumn::set_function_filter`].
    pub fn add_filtered_function(&mut self, address: MemoryAddress) {
        self.filtered_functions.insert(address);
    }

    fn admits_function(&self, address: MemoryAddress) -> bool {
        match self.function_filter {
            FilterMode::None => true,
            FilterMode::Blacklist => !self.filtered_functions.contains(&address),
            FilterMode::Whitelist => self.filtered_functions.contains(&address),
        }
    }

    /// Insert a new function match. Returns `Ok(None)` without inserting if
    /// the address is rejected by the function filter; callers must then not
    /// offer any of the function's basic blocks or instructions.
    pub fn insert_function(
        &mut self,
        pair: RawAddressPair,
    ) -> ColumnResult<Option<&FunctionMatch>> {
        if !self.admits_function(pair.address) {
            return Ok(None);
        }
        self.id_index = None;
        match self.functions.entry(pair.address) {
            Entry::Occupied(_) => Err(ColumnError::DuplicateFunction { address: pair.address }),
            Entry::Vacant(slot) => Ok(Some(&*slot.insert(FunctionMatch::new(pair)))),
        }
    }

    /// Insert a new basic block match as a member of the function at
    /// `function_address`, which must already be part of this column.
    pub fn insert_basic_block(
        &mut self,
        function_address: MemoryAddress,
        pair: RawAddressPair,
    ) -> ColumnResult<&BasicBlockMatch> {
        let Some(function) = self.functions.get_mut(&function_address) else {
            return Err(ColumnError::UnknownFunction { address: function_address });
        };
        if self.basic_blocks.contains_key(&pair.address) {
            return Err(ColumnError::DuplicateBasicBlock { address: pair.address });
        }
        self.id_index = None;
        function.basic_blocks.insert(pair.address);
        Ok(&*self.basic_blocks.entry(pair.address).or_insert_with(|| BasicBlockMatch::new(pair)))
    }

    /// Insert a new instruction match as a member of the basic block at
    /// `basic_block_address`, which must already be part of this column.
    pub fn insert_instruction(
        &mut self,
        basic_block_address: MemoryAddress,
        pair: RawAddressPair,
    ) -> ColumnResult<&InstructionMatch> {
        let Some(block) = self.basic_blocks.get_mut(&basic_block_address) else {
            return Err(ColumnError::UnknownBasicBlock { address: basic_block_address });
        };
        if self.instructions.contains_key(&pair.address) {
            return Err(ColumnError::DuplicateInstruction { address: pair.address });
        }
        self.id_index = None;
        block.instructions.insert(pair.address);
        Ok(&*self.instructions.entry(pair.address).or_insert_with(|| InstructionMatch::new(pair)))
    }

    pub fn find_function_by_address(&self, address: MemoryAddress) -> Option<&FunctionMatch> {
        self.functions.get(&address)
    }

    pub fn find_basic_block_by_address(&self, address: MemoryAddress) -> Option<&BasicBlockMatch> {
        self.basic_blocks.get(&address)
    }

    pub fn find_instruction_by_address(&self, address: MemoryAddress) -> Option<&InstructionMatch> {
        self.instructions.get(&address)
    }

    /// Look up a function by its chain identity.
    ///
    /// Precondition: [`MatchColumn::build_id_indices`] has been called after
    /// the last insertion. Before that the identity index does not exist and
    /// this deterministically returns `None` (never stale data).
    pub fn find_function_by_id(&self, id: Ident) -> Option<&FunctionMatch> {
        let address = self.id_index.as_ref()?.functions.get(&id)?;
        self.functions.get(address)
    }

    /// Look up a basic block by its enclosing function's chain identity and
    /// its own function-scoped identity. Same precondition as
    /// [`MatchColumn::find_function_by_id`].
    ///
    /// There is no identity lookup for instructions: once a block chain is
    /// known, consumers already operate at instruction byte level and fetch
    /// instructions by address.
    pub fn find_basic_block_by_id(
        &self,
        function_id: Ident,
        block_id: Ident,
    ) -> Option<&BasicBlockMatch> {
        let address = self.id_index.as_ref()?.basic_blocks.get(&(function_id, block_id))?;
        self.basic_blocks.get(address)
    }

    /// Iterate all function matches in ascending address order.
    pub fn functions(&self) -> impl Iterator<Item = &FunctionMatch> {
        self.functions.values()
    }

    /// Iterate all basic block matches in ascending address order.
    pub fn basic_blocks(&self) -> impl Iterator<Item = &BasicBlockMatch> {
        self.basic_blocks.values()
    }

    /// Iterate all instruction matches in ascending address order.
    pub fn instructions(&self) -> impl Iterator<Item = &InstructionMatch> {
        self.instructions.values()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn basic_block_count(&self) -> usize {
        self.basic_blocks.len()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Record the call-graph classification of an already-inserted function.
    /// Returns false if no function match exists at the address.
    pub fn set_function_kind(&mut self, address: MemoryAddress, kind: FunctionKind) -> bool {
        match self.functions.get_mut(&address) {
            Some(function) => {
                function.kind = kind;
                true
            }
            None => false,
        }
    }

    /// Record the signature-trimming weight of an already-inserted basic
    /// block. Returns false if no block match exists at the address.
    pub fn set_basic_block_weight(&mut self, address: MemoryAddress, weight: u32) -> bool {
        match self.basic_blocks.get_mut(&address) {
            Some(block) => {
                block.weight = weight;
                true
            }
            None => false,
        }
    }

    /// Attach raw bytes, disassembly text, and immediate operands to an
    /// already-inserted instruction. Returns false if no instruction match
    /// exists at the address.
    pub fn attach_instruction_data(
        &mut self,
        address: MemoryAddress,
        raw_bytes: Vec<u8>,
        disassembly: impl Into<String>,
        immediates: Vec<u64>,
    ) -> bool {
        match self.instructions.get_mut(&address) {
            Some(instruction) => {
                instruction.raw_bytes = raw_bytes;
                instruction.disassembly = disassembly.into();
                instruction.immediates = immediates;
                true
            }
            None => false,
        }
    }

    /// Assign a chain identity to the function at `address`. An identity
    /// already present is kept (first writer wins), making threading
    /// deterministic when two predecessors name the same successor address.
    /// Returns whether the identity was stored.
    pub(crate) fn assign_function_id(&mut self, address: MemoryAddress, id: Ident) -> bool {
        match self.functions.get_mut(&address) {
            Some(function) if function.addr.id.is_none() => {
                function.addr.id = Some(id);
                self.id_index = None;
                true
            }
            _ => false,
        }
    }

    /// Assign a function-scoped chain identity to the basic block at
    /// `address`. Same first-writer-wins rule as
    /// [`MatchColumn::assign_function_id`].
    pub(crate) fn assign_basic_block_id(&mut self, address: MemoryAddress, id: Ident) -> bool {
        match self.basic_blocks.get_mut(&address) {
            Some(block) if block.addr.id.is_none() => {
                block.addr.id = Some(id);
                self.id_index = None;
                true
            }
            _ => false,
        }
    }

    /// Terminate the match chain by absorbing the second-to-last column's
    /// successor addresses into this column.
    ///
    /// A chain of N pairwise diffs describes N+1 binaries but populates only
    /// N columns, so for every entity of `prev` that still has a successor a
    /// terminal entity (successor address, no further successor) is created
    /// here, or reused if one already exists. Member links are mirrored so
    /// the final binary's functions own their blocks and instructions like
    /// any other column's.
    pub fn finish_chain(&mut self, prev: &MatchColumn) {
        let mut mirrored = 0usize;
        for function in prev.functions.values() {
            let Some(function_here) = function.addr.address_in_next else {
                continue;
            };
            let mirrored_function =
                self.functions.entry(function_here).or_insert_with(|| FunctionMatch {
                    addr: AddressMatch::terminal(function_here),
                    basic_blocks: BTreeSet::new(),
                    kind: FunctionKind::Normal,
                });
            mirrored += 1;

            for block_address in &function.basic_blocks {
                let Some(block) = prev.basic_blocks.get(block_address) else {
                    continue;
                };
                let Some(block_here) = block.addr.address_in_next else {
                    continue;
                };
                mirrored_function.basic_blocks.insert(block_here);
                let mirrored_block =
                    self.basic_blocks.entry(block_here).or_insert_with(|| BasicBlockMatch {
                        addr: AddressMatch::terminal(block_here),
                        instructions: BTreeSet::new(),
                        weight: 0,
                    });

                for instruction_address in &block.instructions {
                    let Some(instruction) = prev.instructions.get(instruction_address) else {
                        continue;
                    };
                    let Some(instruction_here) = instruction.addr.address_in_next else {
                        continue;
                    };
                    mirrored_block.instructions.insert(instruction_here);
                    self.instructions.entry(instruction_here).or_insert_with(|| {
                        InstructionMatch {
                            addr: AddressMatch::terminal(instruction_here),
                            raw_bytes: Vec::new(),
                            disassembly: String::new(),
                            immediates: Vec::new(),
                        }
                    });
                }
            }
        }
        self.id_index = None;
        debug!(functions = mirrored, "terminated chain into final column");
    }

    /// Rebuild the identity indices from the owning address maps.
    ///
    /// Call after all insertions and after identity propagation; the
    /// `find_*_by_id` lookups return `None` until then. Rebuilding is
    /// idempotent and safe to repeat.
    pub fn build_id_indices(&mut self) {
        let mut index = IdIndex::default();
        for function in self.functions.values() {
            let Some(function_id) = function.addr.id else {
                continue;
            };
            index.functions.insert(function_id, function.addr.address);
            for block_address in &function.basic_blocks {
                let Some(block) = self.basic_blocks.get(block_address) else {
                    continue;
                };
                if let Some(block_id) = block.addr.id {
                    index.basic_blocks.insert((function_id, block_id), block.addr.address);
                }
            }
        }
        self.id_index = Some(index);
    }
}
