//! Entity model for matched program elements.
//!
//! A column owns three address-keyed maps of these entities (see
//! [`crate::column::MatchColumn`]). Parent entities reference their members
//! by primary address rather than by pointer: addresses are unique within
//! the owning map, so the address doubles as a stable handle and members
//! structurally cannot outlive the column that owns them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{Ident, MemoryAddress, RawAddressPair};

/// A single match between two neighboring binaries of the chain, plus the
/// chain-wide identity assigned to it by propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressMatch {
    /// Location of this entity in the binary owning the column.
    pub address: MemoryAddress,
    /// Location of the counterpart in the next binary of the chain, if the
    /// pairwise diff reported one.
    pub address_in_next: Option<MemoryAddress>,
    /// Chain identity. `None` until identity propagation has run; once
    /// assigned it is stable for the lifetime of the table.
    pub id: Option<Ident>,
}

impl AddressMatch {
    /// Decode a raw diff pair, translating the `0` sentinel to `None`.
    pub fn from_raw(pair: RawAddressPair) -> Self {
        Self { address: pair.address, address_in_next: pair.next(), id: None }
    }

    /// A terminal match: an element of the last binary with no successor.
    pub fn terminal(address: MemoryAddress) -> Self {
        Self { address, address_in_next: None, id: None }
    }
}

/// Classification of a matched function, mirroring what call-graph exports
/// report for the vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    #[default]
    Normal,
    Library,
    Thunk,
    Imported,
}

/// Function filtering applied by a column on insertion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Admit every function match.
    #[default]
    None,
    /// Reject function matches whose address is listed.
    Blacklist,
    /// Admit only function matches whose address is listed.
    Whitelist,
}

/// A matched instruction. Raw bytes and disassembly only get populated if
/// the instruction is part of a surviving match chain; until then they stay
/// empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionMatch {
    pub addr: AddressMatch,
    pub raw_bytes: Vec<u8>,
    pub disassembly: String,
    /// Immediate operand values extracted from the disassembly.
    pub immediates: Vec<u64>,
}

impl InstructionMatch {
    pub fn new(pair: RawAddressPair) -> Self {
        Self {
            addr: AddressMatch::from_raw(pair),
            raw_bytes: Vec::new(),
            disassembly: String::new(),
            immediates: Vec::new(),
        }
    }
}

/// A matched basic block and the addresses of its matched instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlockMatch {
    pub addr: AddressMatch,
    /// Member instructions, by primary address in the owning column.
    pub instructions: BTreeSet<MemoryAddress>,
    /// Weight used for signature trimming.
    pub weight: u32,
}

impl BasicBlockMatch {
    pub fn new(pair: RawAddressPair) -> Self {
        Self { addr: AddressMatch::from_raw(pair), instructions: BTreeSet::new(), weight: 0 }
    }
}

/// A matched function and the addresses of its matched basic blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMatch {
    pub addr: AddressMatch,
    /// Member basic blocks, by primary address in the owning column.
    pub basic_blocks: BTreeSet<MemoryAddress>,
    pub kind: FunctionKind,
}

impl FunctionMatch {
    pub fn new(pair: RawAddressPair) -> Self {
        Self {
            addr: AddressMatch::from_raw(pair),
            basic_blocks: BTreeSet::new(),
            kind: FunctionKind::Normal,
        }
    }
}
