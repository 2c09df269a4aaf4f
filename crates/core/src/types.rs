//! Shared primitive types for the match-chain table.

use serde::{Deserialize, Serialize};

/// A memory address in one of the chained binaries.
pub type MemoryAddress = u64;

/// Artificial identifier correlating the "same" program element across all
/// columns of a chain. Assigned by identity propagation; `0` is a valid
/// identity (the lowest-addressed function of the master column).
pub type Ident = u32;

/// Sentinel used by diff producers for "no corresponding element in the next
/// binary". Never a valid entity address in a finished table.
pub const NO_NEXT_ADDRESS: MemoryAddress = 0;

/// One matched address pair as reported by a pairwise diff: an address in
/// this binary and the address of its counterpart in the next binary of the
/// chain (or [`NO_NEXT_ADDRESS`]).
///
/// This is the raw boundary shape handed over by diff-result loaders. The
/// sentinel is translated to `Option` exactly once, when the pair enters a
/// column (see [`crate::model::AddressMatch`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAddressPair {
    pub address: MemoryAddress,
    pub address_in_next: MemoryAddress,
}

impl RawAddressPair {
    pub fn new(address: MemoryAddress, address_in_next: MemoryAddress) -> Self {
        Self { address, address_in_next }
    }

    /// The counterpart address in the next binary, with the sentinel decoded.
    pub fn next(&self) -> Option<MemoryAddress> {
        if self.address_in_next == NO_NEXT_ADDRESS {
            None
        } else {
            Some(self.address_in_next)
        }
    }
}
